//! Bounded in-memory store of finished games the trainer samples from.

use std::collections::VecDeque;

use rand::seq::index;
use rand::Rng;

use crate::msg::GameRecord;

/// Ring buffer of game records. Once full, the oldest games fall out, so
/// training data tracks recent model strength.
pub struct ReplayBuffer {
    records: VecDeque<GameRecord>,
    capacity: usize,
    total_inserted: u64,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        ReplayBuffer {
            records: VecDeque::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
            total_inserted: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Games ever inserted, including ones already evicted.
    pub fn total_inserted(&self) -> u64 {
        self.total_inserted
    }

    /// Drops all stored games (the insert counter is kept).
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn insert(&mut self, record: GameRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.total_inserted += 1;
    }

    /// Uniformly samples up to `n` records without replacement.
    pub fn sample<R: Rng>(&self, rng: &mut R, n: usize) -> Vec<&GameRecord> {
        let n = n.min(self.records.len());
        if n == 0 {
            return Vec::new();
        }
        index::sample(rng, self.records.len(), n)
            .iter()
            .map(|i| &self.records[i])
            .collect()
    }
}

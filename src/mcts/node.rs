//! Per-node search statistics.
//!
//! Nodes live in the tree arena and are mutated concurrently by all worker
//! threads of one engine: visit counts and accumulated values are atomics,
//! expansion and terminal classification are write-once (`OnceLock`), so
//! selection and backup never take a node-level lock.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Sentinel child id for an edge whose child node has not been allocated.
pub(crate) const NIL: usize = usize::MAX;

fn atomic_add_f64(cell: &AtomicU64, delta: f64) {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        let next = f64::from_bits(current) + delta;
        match cell.compare_exchange_weak(
            current,
            next.to_bits(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

/// One action edge out of a node: prior, visit count, accumulated value and
/// the lazily-allocated child.
pub(crate) struct Edge<A> {
    pub action: A,
    prior: AtomicU32,
    pub child: AtomicUsize,
    pub visits: AtomicU32,
    total_value: AtomicU64,
}

impl<A: Copy> Edge<A> {
    pub fn new(action: A, prior: f32) -> Self {
        Edge {
            action,
            prior: AtomicU32::new(prior.to_bits()),
            child: AtomicUsize::new(NIL),
            visits: AtomicU32::new(0),
            total_value: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn prior(&self) -> f32 {
        f32::from_bits(self.prior.load(Ordering::Relaxed))
    }

    /// Root noise rewrites priors in place after expansion.
    pub fn set_prior(&self, p: f32) {
        self.prior.store(p.to_bits(), Ordering::Relaxed);
    }

    pub fn n(&self) -> u32 {
        self.visits.load(Ordering::Relaxed)
    }

    pub fn total_value(&self) -> f64 {
        f64::from_bits(self.total_value.load(Ordering::Relaxed))
    }

    /// Mean action value from the perspective of the player choosing this
    /// edge. Unvisited edges score zero.
    pub fn q(&self) -> f32 {
        let n = self.n();
        if n == 0 {
            0.0
        } else {
            (self.total_value() / n as f64) as f32
        }
    }

    pub fn record_visit(&self, value: f64) {
        self.visits.fetch_add(1, Ordering::Relaxed);
        atomic_add_f64(&self.total_value, value);
    }

    /// Fresh copy of the statistics with the child id remapped; used when
    /// the tree reroots and compacts its arena.
    pub fn duplicate_with_child(&self, child: usize) -> Self {
        Edge {
            action: self.action,
            prior: AtomicU32::new(self.prior.load(Ordering::Relaxed)),
            child: AtomicUsize::new(child),
            visits: AtomicU32::new(self.n()),
            total_value: AtomicU64::new(self.total_value.load(Ordering::Relaxed)),
        }
    }
}

pub(crate) struct Node<A> {
    pub visits: AtomicU32,
    total_value: AtomicU64,
    /// Terminal value from this node's mover perspective; set once when the
    /// replayed state turns out to be finished. Terminal nodes are never
    /// expanded.
    pub terminal: OnceLock<f32>,
    /// Edges with priors, created in one shot on first evaluation.
    pub edges: OnceLock<Vec<Edge<A>>>,
}

impl<A: Copy> Node<A> {
    pub fn new() -> Self {
        Node {
            visits: AtomicU32::new(0),
            total_value: AtomicU64::new(0f64.to_bits()),
            terminal: OnceLock::new(),
            edges: OnceLock::new(),
        }
    }

    pub fn expanded(&self) -> bool {
        self.edges.get().is_some()
    }

    pub fn n(&self) -> u32 {
        self.visits.load(Ordering::Relaxed)
    }

    /// Mean node value from this node's mover perspective.
    pub fn value(&self) -> f32 {
        let n = self.n();
        if n == 0 {
            0.0
        } else {
            (f64::from_bits(self.total_value.load(Ordering::Relaxed)) / n as f64) as f32
        }
    }

    pub fn record_visit(&self, value: f64) {
        self.visits.fetch_add(1, Ordering::Relaxed);
        atomic_add_f64(&self.total_value, value);
    }

    /// First expansion wins; racing workers that evaluated the same leaf
    /// simply discard their priors.
    pub fn expand(&self, priors: Vec<(A, f32)>) -> bool {
        self.edges
            .set(priors.into_iter().map(|(a, p)| Edge::new(a, p)).collect())
            .is_ok()
    }

    pub fn duplicate(&self) -> Node<A> {
        let copy = Node::new();
        copy.visits.store(self.n(), Ordering::Relaxed);
        copy.total_value.store(
            self.total_value.load(Ordering::Relaxed),
            Ordering::Relaxed,
        );
        if let Some(&v) = self.terminal.get() {
            let _ = copy.terminal.set(v);
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_q_is_zero_until_visited() {
        let e = Edge::new(7u32, 0.5);
        assert_eq!(e.q(), 0.0);
        e.record_visit(1.0);
        e.record_visit(0.0);
        assert_eq!(e.n(), 2);
        assert!((e.q() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn expand_is_write_once() {
        let n: Node<u32> = Node::new();
        assert!(!n.expanded());
        assert!(n.expand(vec![(0, 0.5), (1, 0.5)]));
        assert!(!n.expand(vec![(0, 1.0)]));
        assert_eq!(n.edges.get().map(|e| e.len()), Some(2));
    }

    #[test]
    fn concurrent_visits_accumulate_exactly() {
        let n: Node<u32> = Node::new();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        n.record_visit(0.25);
                    }
                });
            }
        });
        assert_eq!(n.n(), 8000);
        assert!((n.value() - 0.25).abs() < 1e-6);
    }
}

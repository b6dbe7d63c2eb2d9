//! The leaf-evaluation batching queue.
//!
//! Worker threads enqueue leaf states and block cooperatively; whichever
//! worker fills the batch to `batch_size`, or times out with requests
//! pending, becomes the flusher: it takes the whole pending batch, issues
//! one oracle call outside the lock, deposits per-ticket outcomes and wakes
//! everyone. This amortizes network/GPU round-trips while bounding the
//! added latency of any single rollout.
//!
//! The collection pattern follows the batch inference server in
//! Ynkcc-rust_4x8 (`inference.rs`), reshaped from a dedicated server thread
//! into worker-driven flushing so the engine needs no extra thread.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use log::warn;

use crate::mcts::actor::ActorError;

/// Per-ticket failure. `Degraded` keeps the search alive with default
/// priors; `Fatal` aborts the whole run; `Poisoned` is what later
/// submissions observe after a fatal flush.
#[derive(Debug, Clone)]
pub(crate) enum BatchError {
    Degraded,
    Fatal(ActorError),
    Poisoned,
}

struct BatchInner<S, R> {
    pending: Vec<(u64, S)>,
    ready: HashMap<u64, Result<R, BatchError>>,
    next_ticket: u64,
    flushing: bool,
    poisoned: bool,
}

pub(crate) struct EvalBatcher<S, R> {
    inner: Mutex<BatchInner<S, R>>,
    cond: Condvar,
    batch_size: usize,
    timeout: Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl<S, R> EvalBatcher<S, R> {
    pub fn new(batch_size: usize, timeout: Duration) -> Self {
        EvalBatcher {
            inner: Mutex::new(BatchInner {
                pending: Vec::new(),
                ready: HashMap::new(),
                next_ticket: 0,
                flushing: false,
                poisoned: false,
            }),
            cond: Condvar::new(),
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    /// Clears a poisoned queue so the owning engine can be reused after the
    /// caller rebuilt its actor. Only safe between searches.
    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        inner.pending.clear();
        inner.ready.clear();
        inner.flushing = false;
        inner.poisoned = false;
    }

    /// Enqueues one request and blocks until its outcome is available,
    /// flushing the batch through `evaluate` when this worker is the one
    /// that fills it or times out first.
    pub fn submit<F>(&self, request: S, evaluate: F) -> Result<R, BatchError>
    where
        F: Fn(Vec<S>) -> Result<Vec<R>, ActorError>,
    {
        let mut inner = lock(&self.inner);
        if inner.poisoned {
            return Err(BatchError::Poisoned);
        }
        let ticket = inner.next_ticket;
        inner.next_ticket += 1;
        inner.pending.push((ticket, request));

        loop {
            if let Some(outcome) = inner.ready.remove(&ticket) {
                return outcome;
            }
            if inner.poisoned {
                return Err(BatchError::Poisoned);
            }

            if !inner.flushing && inner.pending.len() >= self.batch_size {
                inner = self.flush(inner, &evaluate);
                continue;
            }

            let (guard, _timeout) = self
                .cond
                .wait_timeout(inner, self.timeout)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;

            // After a timeout wake-up, flush whatever is pending so no
            // worker waits unboundedly on a partial batch.
            if inner.ready.contains_key(&ticket) || inner.poisoned {
                continue;
            }
            if !inner.flushing && !inner.pending.is_empty() {
                inner = self.flush(inner, &evaluate);
            }
        }
    }

    fn flush<'a, F>(
        &'a self,
        mut inner: MutexGuard<'a, BatchInner<S, R>>,
        evaluate: &F,
    ) -> MutexGuard<'a, BatchInner<S, R>>
    where
        F: Fn(Vec<S>) -> Result<Vec<R>, ActorError>,
    {
        inner.flushing = true;
        let batch = std::mem::take(&mut inner.pending);
        drop(inner);

        let (tickets, requests): (Vec<u64>, Vec<S>) = batch.into_iter().unzip();
        let outcome = evaluate(requests);

        let mut inner = lock(&self.inner);
        inner.flushing = false;
        match outcome {
            Ok(responses) if responses.len() == tickets.len() => {
                for (ticket, response) in tickets.into_iter().zip(responses) {
                    inner.ready.insert(ticket, Ok(response));
                }
            }
            Ok(responses) => {
                warn!(
                    "evaluation batch size mismatch: sent {}, got {}",
                    tickets.len(),
                    responses.len()
                );
                for ticket in tickets {
                    inner.ready.insert(ticket, Err(BatchError::Degraded));
                }
            }
            Err(err @ ActorError::VersionMismatch { .. }) => {
                inner.poisoned = true;
                for ticket in tickets {
                    inner.ready.insert(ticket, Err(BatchError::Fatal(err.clone())));
                }
            }
            Err(err) => {
                warn!("evaluation batch failed, degrading to default priors: {err}");
                for ticket in tickets {
                    inner.ready.insert(ticket, Err(BatchError::Degraded));
                }
            }
        }
        self.cond.notify_all();
        inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn full_batch_is_evaluated_in_one_call() {
        let batcher: Arc<EvalBatcher<u32, u32>> =
            Arc::new(EvalBatcher::new(4, Duration::from_millis(200)));
        let calls = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for i in 0..4u32 {
                let batcher = Arc::clone(&batcher);
                let calls = Arc::clone(&calls);
                s.spawn(move || {
                    let out = batcher
                        .submit(i, |xs| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(xs.into_iter().map(|x| x * 10).collect())
                        })
                        .unwrap();
                    assert_eq!(out, i * 10);
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn partial_batch_flushes_after_timeout() {
        let batcher: EvalBatcher<u32, u32> = EvalBatcher::new(64, Duration::from_millis(5));
        let out = batcher.submit(3, |xs| Ok(xs)).unwrap();
        assert_eq!(out, 3);
    }

    #[test]
    fn version_mismatch_poisons_the_queue() {
        let batcher: EvalBatcher<u32, u32> = EvalBatcher::new(1, Duration::from_millis(5));
        let err = batcher
            .submit(0, |_| {
                Err(ActorError::VersionMismatch {
                    got: 3,
                    required: 4,
                })
            })
            .unwrap_err();
        assert!(matches!(err, BatchError::Fatal(_)));

        let err = batcher.submit(1, |xs| Ok(xs)).unwrap_err();
        assert!(matches!(err, BatchError::Poisoned));

        batcher.reset();
        assert_eq!(batcher.submit(2, |xs| Ok(xs)).unwrap(), 2);
    }
}

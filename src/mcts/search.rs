//! The rollout engine: N worker threads cooperating on one shared tree,
//! funnelling leaf evaluations through the batching queue to the actor.

use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use log::{error, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::game::GameState;
use crate::mcts::actor::{Actor, ActorError, NodeResponse, Oracle};
use crate::mcts::batcher::{BatchError, EvalBatcher};
use crate::mcts::node::NIL;
use crate::mcts::options::TsOptions;
use crate::mcts::result::{BestEdgeInfo, MctsResult};
use crate::mcts::tree::Tree;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// The oracle served a model other than the required version. The
    /// caller must rebuild its actor before searching again.
    #[error("model version {got} and required version {required} are not consistent")]
    VersionMismatch { got: i64, required: i64 },

    /// The search proposed an action that is illegal in the live game
    /// state. Internal-consistency failure; the current step is aborted.
    #[error("search proposed an action that is illegal in the live game state")]
    InconsistentMove,

    /// A non-terminal state reported no legal actions, violating the game
    /// contract.
    #[error("non-terminal state has no legal actions")]
    NoLegalActions,
}

enum LeafKind {
    /// Replayed state diverged from the tree; the rollout is abandoned.
    Inconsistent,
    /// Known-terminal node with its cached mover-perspective value.
    Terminal(usize, f32),
    /// Existing node that still needs evaluation and expansion.
    Evaluate(usize),
    /// Selection crossed an edge whose child is not allocated yet.
    NeedChild { parent: usize, edge_idx: usize },
}

/// One search engine instance, driving one concurrently-simulated game.
pub struct TreeSearch<G: GameState, O: Oracle<G>> {
    options: TsOptions,
    tree: Tree<G>,
    actor: Actor<G, O>,
    batcher: EvalBatcher<G, NodeResponse<G::Action>>,
}

impl<G: GameState, O: Oracle<G>> TreeSearch<G, O> {
    pub fn new(options: TsOptions, actor: Actor<G, O>) -> Self {
        let batcher = EvalBatcher::new(
            options.num_rollouts_per_batch,
            Duration::from_millis(options.batch_timeout_ms),
        );
        TreeSearch {
            options,
            tree: Tree::new(),
            actor,
            batcher,
        }
    }

    pub fn options(&self) -> &TsOptions {
        &self.options
    }

    pub fn set_required_version(&mut self, ver: i64) {
        self.actor.set_required_version(ver);
    }

    /// Reroots the tree after a real move. `false` when the move was not
    /// tracked, in which case the caller resets instead.
    pub fn advance(&self, action: G::Action) -> bool {
        self.tree.advance(action)
    }

    /// Discards the whole tree. Safe between searches only.
    pub fn clear(&self) {
        self.tree.clear();
        self.batcher.reset();
    }

    pub fn tree_is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn root_state(&self) -> Option<G> {
        self.tree.root_state()
    }

    /// Runs the full rollout budget and summarizes the root.
    pub fn run(&self, root_state: &G) -> Result<MctsResult<G::Action>, EngineError> {
        // Terminal short-circuit: no rollouts, no oracle.
        if root_state.terminated() {
            let reward = root_state.evaluate_game();
            let mapped = if reward > 0.0 {
                1.0
            } else if reward < 0.0 {
                -1.0
            } else {
                0.0
            };
            return Ok(MctsResult {
                best_action: None,
                mcts_policy: Vec::new(),
                root_value: mapped,
                best_edge_info: BestEdgeInfo { q: mapped, visits: 0 },
                total_visits: 0,
            });
        }

        if !self.tree.root_matches(root_state) {
            self.tree.reset_to(root_state.clone());
        }
        // Recover the queue from a previous aborted search.
        self.batcher.reset();

        self.ensure_root_expanded(root_state)?;
        if self.options.root_noise_enabled() {
            let mut rng =
                StdRng::seed_from_u64(self.options.seed.wrapping_add(root_state.ply() as u64));
            self.tree
                .apply_root_noise(self.options.root_alpha, self.options.root_epsilon, &mut rng);
        }

        let fatal: Mutex<Option<EngineError>> = Mutex::new(None);
        std::thread::scope(|scope| {
            for _ in 0..self.options.num_threads.max(1) {
                scope.spawn(|| {
                    for _ in 0..self.options.num_rollouts_per_thread {
                        {
                            let guard = fatal.lock().unwrap_or_else(|e| e.into_inner());
                            if guard.is_some() {
                                return;
                            }
                        }
                        match self.rollout() {
                            Ok(()) => {}
                            Err(None) => return,
                            Err(Some(e)) => {
                                let mut guard =
                                    fatal.lock().unwrap_or_else(|e| e.into_inner());
                                guard.get_or_insert(e);
                                return;
                            }
                        }
                    }
                });
            }
        });

        let fatal = fatal.into_inner().unwrap_or_else(|e| e.into_inner());
        if let Some(e) = fatal {
            return Err(e);
        }
        Ok(self.summarize_root())
    }

    fn ensure_root_expanded(&self, root_state: &G) -> Result<(), EngineError> {
        {
            let arena = self.tree.read();
            if arena.nodes[arena.root].expanded() {
                return Ok(());
            }
        }
        let (value, priors) = match self.actor.evaluate_batch(std::slice::from_ref(root_state)) {
            Ok(mut resps) => {
                let resp = resps.pop().ok_or(EngineError::NoLegalActions)?;
                (resp.value, resp.pi)
            }
            Err(ActorError::VersionMismatch { got, required }) => {
                return Err(EngineError::VersionMismatch { got, required });
            }
            Err(e) => {
                warn!("root evaluation failed, using default priors: {e}");
                (0.0, uniform_priors(root_state))
            }
        };
        if priors.is_empty() {
            return Err(EngineError::NoLegalActions);
        }
        let arena = self.tree.read();
        let root = &arena.nodes[arena.root];
        root.expand(priors);
        root.record_visit(value as f64);
        Ok(())
    }

    /// One select/expand/evaluate/backup pass. `Err(None)` stops this
    /// worker without a verdict (another worker already aborted the run).
    fn rollout(&self) -> Result<(), Option<EngineError>> {
        let (mut state, path, leaf) = {
            let arena = self.tree.read();
            let Some(mut state) = arena.root_state.clone() else {
                return Err(None);
            };
            let mut cur = arena.root;
            let mut path: Vec<(usize, usize)> = Vec::new();
            let leaf = loop {
                let node = &arena.nodes[cur];
                if let Some(&v) = node.terminal.get() {
                    break LeafKind::Terminal(cur, v);
                }
                let Some(edges) = node.edges.get() else {
                    break LeafKind::Evaluate(cur);
                };
                let sqrt_n = (node.n() as f32).sqrt();
                let mut best = 0usize;
                let mut best_score = f32::NEG_INFINITY;
                for (i, e) in edges.iter().enumerate() {
                    let score = e.q()
                        + self.options.c_puct * e.prior() * sqrt_n / (1.0 + e.n() as f32);
                    if score > best_score {
                        best_score = score;
                        best = i;
                    }
                }
                if state.forward(edges[best].action).is_err() {
                    break LeafKind::Inconsistent;
                }
                path.push((cur, best));
                let child = edges[best].child.load(Ordering::Relaxed);
                if child == NIL {
                    break LeafKind::NeedChild {
                        parent: cur,
                        edge_idx: best,
                    };
                }
                cur = child;
            };
            (state, path, leaf)
        };

        let leaf_id = match leaf {
            LeafKind::Inconsistent => {
                error!("tree edge replay produced an illegal move; abandoning rollout");
                return Ok(());
            }
            LeafKind::Terminal(id, v) => {
                self.backup(&path, id, v);
                return Ok(());
            }
            LeafKind::Evaluate(id) => id,
            LeafKind::NeedChild { parent, edge_idx } => self.tree.alloc_child(parent, edge_idx),
        };

        if let Some(resp) = self.actor.pre_evaluate(&state) {
            let v = resp.value;
            {
                let arena = self.tree.read();
                let _ = arena.nodes[leaf_id].terminal.set(v);
            }
            self.backup(&path, leaf_id, v);
            return Ok(());
        }

        let (value, priors) = match self
            .batcher
            .submit(state.clone(), |batch| self.actor.evaluate_batch(&batch))
        {
            Ok(resp) => (resp.value, resp.pi),
            Err(BatchError::Degraded) => (0.0, uniform_priors(&state)),
            Err(BatchError::Fatal(ActorError::VersionMismatch { got, required })) => {
                return Err(Some(EngineError::VersionMismatch { got, required }));
            }
            Err(BatchError::Fatal(_)) | Err(BatchError::Poisoned) => return Err(None),
        };
        if priors.is_empty() {
            error!("non-terminal state produced no legal actions; abandoning rollout");
            return Ok(());
        }

        {
            let arena = self.tree.read();
            arena.nodes[leaf_id].expand(priors);
        }
        self.backup(&path, leaf_id, value);
        Ok(())
    }

    /// Propagates the leaf value to the root, flipping sign at every ply
    /// since players alternate.
    fn backup(&self, path: &[(usize, usize)], leaf_id: usize, leaf_value: f32) {
        let arena = self.tree.read();
        arena.nodes[leaf_id].record_visit(leaf_value as f64);
        let mut v = leaf_value as f64;
        for &(node_id, edge_idx) in path.iter().rev() {
            v = -v;
            let node = &arena.nodes[node_id];
            node.record_visit(v);
            if let Some(edges) = node.edges.get() {
                edges[edge_idx].record_visit(v);
            }
        }
    }

    fn summarize_root(&self) -> MctsResult<G::Action> {
        let snapshots = self.tree.root_edge_snapshots();
        let total: u64 = snapshots.iter().map(|s| s.visits as u64).sum();

        let mcts_policy: Vec<(G::Action, f32)> = if total > 0 {
            snapshots
                .iter()
                .map(|s| (s.action, s.visits as f32 / total as f32))
                .collect()
        } else {
            let uniform = 1.0 / snapshots.len().max(1) as f32;
            snapshots.iter().map(|s| (s.action, uniform)).collect()
        };

        let best = snapshots.iter().max_by_key(|s| s.visits);
        MctsResult {
            best_action: best.map(|s| s.action),
            best_edge_info: best
                .map(|s| BestEdgeInfo {
                    q: s.q,
                    visits: s.visits,
                })
                .unwrap_or(BestEdgeInfo { q: 0.0, visits: 0 }),
            root_value: self.tree.root_value(),
            mcts_policy,
            total_visits: total,
        }
    }
}

fn uniform_priors<G: GameState>(state: &G) -> Vec<(G::Action, f32)> {
    let legal = state.legal_actions();
    let uniform = 1.0 / legal.len().max(1) as f32;
    legal.into_iter().map(|a| (a, uniform)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Pull, TugOfWar};
    use crate::mcts::actor::{ActorParams, OracleReply, UniformOracle};
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingOracle {
        calls: AtomicUsize,
        version: i64,
    }

    impl<G: GameState> Oracle<G> for CountingOracle {
        fn evaluate(&self, states: &[G]) -> Result<Vec<OracleReply>, crate::mcts::actor::OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(states
                .iter()
                .map(|_| OracleReply {
                    value: 0.0,
                    policy: vec![1.0 / G::action_space() as f32; G::action_space()],
                    model_version: self.version,
                })
                .collect())
        }
    }

    fn engine(options: TsOptions, required: i64) -> TreeSearch<TugOfWar, UniformOracle> {
        let actor = Actor::new(
            ActorParams {
                name: "test".into(),
                required_version: required,
            },
            Arc::new(UniformOracle::new(7)),
        );
        TreeSearch::new(options, actor)
    }

    #[test]
    fn search_yields_a_legal_best_action_and_a_normalized_policy() {
        let ts = engine(TsOptions::default().for_eval(), -1);
        let state = TugOfWar::new(3, 20);
        let result = ts.run(&state).unwrap();

        let best = result.best_action.expect("non-terminal root has a move");
        assert!(state.legal_actions().contains(&best));
        let total: f32 = result.mcts_policy.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-4);
        assert_eq!(
            result.total_visits,
            ts.options().total_rollouts() as u64
        );
    }

    #[test]
    fn terminal_root_is_answered_without_the_oracle() {
        let oracle = Arc::new(CountingOracle {
            calls: AtomicUsize::new(0),
            version: 1,
        });
        let ts = TreeSearch::new(
            TsOptions::default(),
            Actor::new(ActorParams::default(), Arc::clone(&oracle)),
        );
        let mut state = TugOfWar::new(1, 20);
        state.forward(Pull::Forward).unwrap();
        assert!(state.terminated());

        let result = ts.run(&state).unwrap();
        assert_eq!(result.best_action, None);
        assert_eq!(result.root_value, 1.0);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_model_version_aborts_the_search() {
        let oracle = Arc::new(CountingOracle {
            calls: AtomicUsize::new(0),
            version: 3,
        });
        let ts = TreeSearch::new(
            TsOptions::default(),
            Actor::new(
                ActorParams {
                    name: "test".into(),
                    required_version: 5,
                },
                oracle,
            ),
        );
        let err = ts.run(&TugOfWar::new(3, 20)).unwrap_err();
        assert_matches!(
            err,
            EngineError::VersionMismatch { got: 3, required: 5 }
        );
    }

    #[test]
    fn search_continues_on_a_rerooted_tree() {
        let ts = engine(TsOptions::default().for_eval(), -1);
        let mut state = TugOfWar::new(3, 20);
        let result = ts.run(&state).unwrap();
        let best = result.best_action.unwrap();

        state.forward(best).unwrap();
        assert!(ts.advance(best));
        let next = ts.run(&state).unwrap();
        assert!(next.best_action.is_some());
        assert!(ts
            .root_state()
            .map(|r| r.equals(&state))
            .unwrap_or(false));
    }
}

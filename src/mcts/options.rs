use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Tree-search options. Part of the matchup key ([`crate::msg::ModelPair`])
/// exchanged between server and clients, so equality and hashing are
/// defined over every field, with floats compared by bit pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TsOptions {
    /// Worker threads per engine instance.
    pub num_threads: usize,
    /// Rollout budget per worker; one `run()` performs
    /// `num_threads * num_rollouts_per_thread` rollouts.
    pub num_rollouts_per_thread: usize,
    /// Leaf evaluations accumulated before one oracle call is issued.
    pub num_rollouts_per_batch: usize,
    /// Flush a partial batch after waiting this long. Together with
    /// `num_rollouts_per_batch` this bounds the added latency per rollout.
    pub batch_timeout_ms: u64,
    /// PUCT exploration constant.
    pub c_puct: f32,
    /// Dirichlet concentration for root noise. Zero disables noise.
    pub root_alpha: f32,
    /// Mixing weight of root noise into root priors. Zero disables noise.
    pub root_epsilon: f32,
    /// Reuse the tree across real moves via `advance` instead of rebuilding.
    pub persistent_tree: bool,
    /// Seed for root-noise sampling.
    pub seed: u64,
}

impl Default for TsOptions {
    fn default() -> Self {
        TsOptions {
            num_threads: 4,
            num_rollouts_per_thread: 50,
            num_rollouts_per_batch: 8,
            batch_timeout_ms: 10,
            c_puct: 1.5,
            root_alpha: 0.3,
            root_epsilon: 0.25,
            persistent_tree: true,
            seed: 0,
        }
    }
}

impl TsOptions {
    /// Total rollouts one `run()` call performs.
    pub fn total_rollouts(&self) -> usize {
        self.num_threads * self.num_rollouts_per_thread
    }

    /// Copy with root noise disabled, used for evaluation matches where
    /// determinism matters more than exploration diversity.
    pub fn for_eval(&self) -> Self {
        TsOptions {
            root_alpha: 0.0,
            root_epsilon: 0.0,
            ..self.clone()
        }
    }

    pub fn root_noise_enabled(&self) -> bool {
        self.root_alpha > 0.0 && self.root_epsilon > 0.0
    }
}

impl PartialEq for TsOptions {
    fn eq(&self, other: &Self) -> bool {
        self.num_threads == other.num_threads
            && self.num_rollouts_per_thread == other.num_rollouts_per_thread
            && self.num_rollouts_per_batch == other.num_rollouts_per_batch
            && self.batch_timeout_ms == other.batch_timeout_ms
            && self.c_puct.to_bits() == other.c_puct.to_bits()
            && self.root_alpha.to_bits() == other.root_alpha.to_bits()
            && self.root_epsilon.to_bits() == other.root_epsilon.to_bits()
            && self.persistent_tree == other.persistent_tree
            && self.seed == other.seed
    }
}

impl Eq for TsOptions {}

impl Hash for TsOptions {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.num_threads.hash(state);
        self.num_rollouts_per_thread.hash(state);
        self.num_rollouts_per_batch.hash(state);
        self.batch_timeout_ms.hash(state);
        self.c_puct.to_bits().hash(state);
        self.root_alpha.to_bits().hash(state);
        self.root_epsilon.to_bits().hash(state);
        self.persistent_tree.hash(state);
        self.seed.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(opt: &TsOptions) -> u64 {
        let mut h = DefaultHasher::new();
        opt.hash(&mut h);
        h.finish()
    }

    #[test]
    fn for_eval_disables_noise_only() {
        let opt = TsOptions::default();
        let eval = opt.for_eval();
        assert!(!eval.root_noise_enabled());
        assert_eq!(eval.num_threads, opt.num_threads);
        assert_eq!(eval.c_puct.to_bits(), opt.c_puct.to_bits());
    }

    #[test]
    fn equality_and_hash_cover_float_fields() {
        let a = TsOptions::default();
        let mut b = a.clone();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        b.c_puct = 2.0;
        assert_ne!(a, b);
    }
}

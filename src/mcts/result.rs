/// Q and visit count for the edge finally chosen by a search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestEdgeInfo {
    pub q: f32,
    pub visits: u32,
}

/// Value-and-policy summary of one completed search. Created once per
/// `run()` call and owned by the caller until the next move overwrites it.
#[derive(Debug, Clone)]
pub struct MctsResult<A> {
    /// Most-visited root edge. `None` only when the root was terminal.
    pub best_action: Option<A>,
    /// Visit-count-normalized distribution over the root's legal actions.
    /// Sums to 1.0 (within float error); actions absent from the root were
    /// illegal and implicitly carry zero probability.
    pub mcts_policy: Vec<(A, f32)>,
    /// Mean value of the root from the root mover's perspective.
    pub root_value: f32,
    pub best_edge_info: BestEdgeInfo,
    pub total_visits: u64,
}

impl<A: std::fmt::Debug> MctsResult<A> {
    pub fn info(&self) -> String {
        format!(
            "best={:?} q={:.3} n={} root_value={:.3} total={}",
            self.best_action,
            self.best_edge_info.q,
            self.best_edge_info.visits,
            self.root_value,
            self.total_visits
        )
    }
}

//! Server-side control plane.
//!
//! The server never plays games itself. It hands out [`crate::msg::MsgRequest`]s
//! describing what each client thread should play, accounts the records that
//! come back, gates training on sample sufficiency and decides when a
//! candidate model replaces the best one.

pub mod client_manager;
pub mod eval_ctrl;
pub mod fair_pick;
pub mod record_sink;
pub mod replay_buffer;
pub mod selfplay_ctrl;
pub mod train_ctrl;

pub use client_manager::{ClientManager, ClientState};
pub use eval_ctrl::{EvalResult, EvalSubCtrl, ModelPerformance};
pub use fair_pick::{Pick, RegisterResult, WinCount};
pub use record_sink::RecordSink;
pub use replay_buffer::ReplayBuffer;
pub use selfplay_ctrl::{CtrlResult, SelfPlaySubCtrl};
pub use train_ctrl::TrainCtrl;

/// Knobs for the whole training run, shared by the sub-controllers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GameOptions {
    /// Games required from the current model before the first weight update.
    pub selfplay_init_num: i64,
    /// Additional games required per subsequent weight update. Zero or
    /// negative means training never waits once the initial batch is in.
    pub selfplay_update_num: i64,
    /// Let selfplay clients keep playing a stale model while the new one
    /// loads, instead of restarting their games.
    pub selfplay_async: bool,
    /// Evaluation games per candidate (split into two color-swapped halves).
    /// Zero promotes every candidate without evaluation.
    pub eval_num_games: usize,
    /// Candidate winrate required for promotion.
    pub eval_winrate_thres: f32,
    /// Game threads a client devotes to evaluation games.
    pub eval_num_threads: i64,
    /// Keep at least this fraction of clients on selfplay duty.
    pub selfplay_only_ratio: f32,
    /// Cap on evaluation clients; negative means unlimited.
    pub max_num_eval: i64,
    /// Keep games played under superseded models in the replay buffer when
    /// a new model is promoted; with `false` the buffer starts over.
    pub keep_prev_selfplay: bool,
    /// Seconds of silence before a client is presumed dead.
    pub client_ttl_secs: u64,
    /// Capacity of the in-memory replay buffer.
    pub replay_capacity: usize,
}

impl Default for GameOptions {
    fn default() -> Self {
        GameOptions {
            selfplay_init_num: 5000,
            selfplay_update_num: 1000,
            selfplay_async: false,
            eval_num_games: 400,
            eval_winrate_thres: 0.55,
            eval_num_threads: 4,
            selfplay_only_ratio: 0.9,
            max_num_eval: -1,
            keep_prev_selfplay: true,
            client_ttl_secs: 300,
            replay_capacity: 100_000,
        }
    }
}

/// What became of one incoming game record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedResult {
    /// Counted toward the current model's sample requirement.
    Fed,
    /// Played under an older model than the current one.
    VersionMismatch,
    /// Not a selfplay record (black and white versions differ).
    NotSelfplay,
    /// Not a pending evaluation matchup.
    NotEval,
    /// An evaluation game the server never handed out.
    NotRequested,
}

//! # draughts_zero
//!
//! Selfplay reinforcement-learning infrastructure for abstract board games
//! (draughts variants, ugolki and the like).
//!
//! ## Features
//!
//! - **MCTS Engine**: batched multi-threaded Monte Carlo Tree Search with
//!   asynchronous neural-network evaluation and tree-lifecycle management
//! - **Game Contract**: a narrow [`game::GameState`] interface the engine
//!   depends on; board rules live outside this crate
//! - **Client Loop**: per-game selfplay driver producing training records
//! - **Server Controls**: selfplay sample accounting, candidate-model
//!   evaluation and client liveness/role management
//!
//! ## Usage
//!
//! ```no_run
//! use draughts_zero::game::TugOfWar;
//! use draughts_zero::mcts::{Actor, ActorParams, MctsAi, TreeSearch, TsOptions, UniformOracle};
//! use std::sync::Arc;
//!
//! let actor = Actor::new(ActorParams::default(), Arc::new(UniformOracle::new(0)));
//! let mut ai = MctsAi::new(TreeSearch::new(TsOptions::default(), actor));
//! let result = ai.act(&TugOfWar::new(4, 32)).unwrap();
//! # let _ = result;
//! ```

/// Core game contract plus the demo game used by the binary and tests
pub mod game;

/// Batched multi-threaded Monte Carlo Tree Search engine
pub mod mcts;

/// Server<->client message shapes and game records
pub mod msg;

/// Client-side selfplay loop and request dispatching
pub mod client;

/// Server-side control plane (selfplay ledger, eval gate, client manager)
pub mod server;

/// flexi_logger setup
pub mod logging;

pub use mcts::{MctsAi, MctsResult, TsOptions};
pub use msg::{GameRecord, MsgRequest, RestartReply};

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum DraughtsZeroError {
    #[error("engine error: {0}")]
    Engine(#[from] mcts::EngineError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, DraughtsZeroError>;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

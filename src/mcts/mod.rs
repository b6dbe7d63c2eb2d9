//! Batched multi-threaded Monte Carlo Tree Search.
//!
//! One [`TreeSearch`] instance drives one concurrently-simulated game: it
//! owns the shared [`tree`], a pool of worker threads running the
//! select/expand/evaluate/backup loop, and the [`batcher`] that amortizes
//! neural-network round-trips across workers. [`MctsAi`] wraps an engine
//! with tree-lifecycle management across real moves.

pub mod actor;
pub mod ai;
pub mod batcher;
pub mod node;
pub mod options;
pub mod result;
pub mod search;
pub mod tree;

pub use actor::{Actor, ActorError, ActorParams, NodeResponse, Oracle, OracleError, OracleReply, UniformOracle};
pub use ai::MctsAi;
pub use options::TsOptions;
pub use result::{BestEdgeInfo, MctsResult};
pub use search::{EngineError, TreeSearch};

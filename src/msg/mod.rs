//! Message shapes exchanged between the training server and selfplay
//! clients, plus the game records fed back for training. Transport is out
//! of scope here; everything is plain serde-serializable data.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mcts::TsOptions;

/// Role the server assigned to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientType {
    Invalid,
    /// Runs selfplay games only.
    SelfplayOnly,
    /// Runs evaluation games when a candidate is pending, selfplay otherwise.
    EvalThenSelfplay,
}

/// Per-client control block sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCtrl {
    pub client_type: ClientType,
    /// Number of concurrent game threads the client should run; -1 leaves
    /// the client's own setting untouched.
    pub num_game_threads: i32,
    /// Evaluation only: play the same model pair with colors swapped.
    pub player_swap: bool,
    /// Selfplay only: keep playing with the stale model while the new one
    /// loads in the background.
    pub async_mode: bool,
}

impl Default for ClientCtrl {
    fn default() -> Self {
        ClientCtrl {
            client_type: ClientType::Invalid,
            num_game_threads: -1,
            player_swap: false,
            async_mode: false,
        }
    }
}

/// Which model versions play Black and White, and with what search
/// settings. Equality and hashing cover the search options too, float
/// fields included (compared by bit pattern), so requests that differ only
/// in, say, `c_puct` are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelPair {
    pub black_ver: i64,
    pub white_ver: i64,
    pub mcts_opt: TsOptions,
}

impl Default for ModelPair {
    fn default() -> Self {
        ModelPair {
            black_ver: -1,
            white_ver: -1,
            mcts_opt: TsOptions::default(),
        }
    }
}

impl ModelPair {
    /// A waiting pair carries no usable model.
    pub fn wait(&self) -> bool {
        self.black_ver < 0
    }

    pub fn set_wait(&mut self) {
        self.black_ver = -1;
        self.white_ver = -1;
    }

    /// Selfplay pairs the model against itself.
    pub fn is_selfplay(&self) -> bool {
        self.black_ver >= 0 && self.black_ver == self.white_ver
    }
}

impl fmt::Display for ModelPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[black={}][white={}]", self.black_ver, self.white_ver)
    }
}

/// What a game thread should do after receiving fresh versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartReply {
    /// Nothing actionable in the reply.
    NoOp,
    /// No model assigned yet; keep waiting.
    OnlyWait,
    /// Versions unchanged; acknowledge without reloading.
    UpdateRequestOnly,
    /// Restart the game with newly loaded models.
    UpdateModel,
    /// Keep the running game; load the new model in the background.
    UpdateModelAsync,
    /// The thread confirmed an earlier update; no further action.
    UpdateComplete,
}

/// Full request from the server to one client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MsgRequest {
    pub vers: ModelPair,
    pub client_ctrl: ClientCtrl,
}

/// A request stamped with the server's monotonically increasing sequence
/// number, so threads can discard replays of requests they already acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRequestSeq {
    pub seq: i64,
    pub request: MsgRequest,
}

impl MsgRequestSeq {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// What one client game thread is currently doing, reported with every
/// record batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadState {
    pub thread_id: i32,
    /// Sequence number of the request the thread last acted on.
    pub seq: i64,
    pub black: i64,
    pub white: i64,
}

impl Default for ThreadState {
    fn default() -> Self {
        ThreadState {
            thread_id: -1,
            seq: -1,
            black: -1,
            white: -1,
        }
    }
}

/// Outcome of one finished game, from Black's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct GameResult {
    pub reward: f32,
    pub num_moves: u32,
}

impl GameResult {
    pub fn is_draw(&self) -> bool {
        self.reward == 0.0
    }
}

/// One finished game: the request it was played under, the move sequence
/// as dense action indices, and the per-ply search outputs used as
/// training targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub request: MsgRequest,
    pub result: GameResult,
    pub actions: Vec<u32>,
    /// Per ply, the visit-count policy over the dense action space.
    pub mcts_policies: Vec<Vec<f32>>,
    /// Per ply, the root value predicted before the move was played.
    pub predicted_values: Vec<f32>,
    /// Loaded from disk rather than played live; bypasses version checks.
    pub offline: bool,
}

impl GameRecord {
    pub fn new(request: MsgRequest) -> Self {
        GameRecord {
            request,
            result: GameResult::default(),
            actions: Vec::new(),
            mcts_policies: Vec::new(),
            predicted_values: Vec::new(),
            offline: false,
        }
    }
}

/// A batch of finished games from one client, with the live state of each
/// of its game threads.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Records {
    pub identity: String,
    pub states: BTreeMap<usize, ThreadState>,
    pub records: Vec<GameRecord>,
}

impl Records {
    pub fn new(identity: impl Into<String>) -> Self {
        Records {
            identity: identity.into(),
            ..Records::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

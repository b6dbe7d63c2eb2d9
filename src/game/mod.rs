//! The game contract the search engine depends on.
//!
//! Board move generation, feature extraction and per-variant rules live
//! outside the engine; the engine only ever talks to a [`GameState`]. The
//! bundled [`TugOfWar`] implementation exists so the binary and the test
//! suite have a cheap, fully deterministic game to drive.

mod tug_of_war;

pub use tug_of_war::{Pull, TugOfWar};

use std::fmt;
use std::hash::Hash;

/// Side to move. Black always moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Player {
    Black,
    White,
}

impl Player {
    pub fn opponent(self) -> Player {
        match self {
            Player::Black => Player::White,
            Player::White => Player::Black,
        }
    }
}

/// Returned by [`GameState::forward`] when the action is not legal in the
/// current position. The state is left untouched.
#[derive(Debug, Clone, thiserror::Error)]
#[error("illegal action index {action} at ply {ply}")]
pub struct IllegalMove {
    pub ply: usize,
    pub action: u32,
}

/// An immutable-until-advanced game position.
///
/// Contract the engine relies on:
/// - a state with no legal action reports `terminated()`;
/// - `evaluate_game()` is only meaningful on terminated states and returns
///   the reward from Black's perspective, in `{-1.0, 0.0, 1.0}`;
/// - `forward` on an illegal action returns `Err` and changes nothing.
pub trait GameState: Clone + Send + Sync + 'static {
    type Action: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// All actions legal in this position.
    fn legal_actions(&self) -> Vec<Self::Action>;

    /// Applies `action`, advancing the position by one ply.
    fn forward(&mut self, action: Self::Action) -> Result<(), IllegalMove>;

    /// Whether the game is over.
    fn terminated(&self) -> bool;

    /// Final reward from Black's perspective. `{-1.0, 0.0, 1.0}`.
    fn evaluate_game(&self) -> f32;

    /// The player to move.
    fn to_move(&self) -> Player;

    /// Number of plies played so far.
    fn ply(&self) -> usize;

    /// Structural equality of positions.
    fn equals(&self, other: &Self) -> bool;

    /// Actions applied since `*cursor` plies, advancing the cursor to the
    /// current ply. `None` when the history cannot be reconciled (the caller
    /// must rebuild its tree from scratch).
    fn moves_since(&self, cursor: &mut usize) -> Option<Vec<Self::Action>>;

    /// Size of the dense action-index space used by oracle policies and
    /// serialized records.
    fn action_space() -> usize;

    /// Dense index of `action` within `0..action_space()`.
    fn action_index(action: Self::Action) -> u32;
}

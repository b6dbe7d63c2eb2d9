//! Client-side selfplay machinery: reacting to server requests and
//! driving whole games into training records.

pub mod dispatcher;
pub mod selfplay;

pub use dispatcher::{Directive, RequestDispatcher};
pub use selfplay::play_game;

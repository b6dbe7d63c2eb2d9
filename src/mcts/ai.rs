//! Per-game wrapper around the search engine.
//!
//! [`MctsAi`] owns a [`TreeSearch`] for the lifetime of one real game and
//! keeps the search tree aligned with the live position: moves played
//! since the last call (our own reply plus the opponent's) are replayed
//! as reroots, and the tree is rebuilt from scratch whenever the history
//! cannot be reconciled.

use log::{debug, info, warn};

use crate::game::GameState;
use crate::mcts::actor::Oracle;
use crate::mcts::result::MctsResult;
use crate::mcts::search::{EngineError, TreeSearch};

pub struct MctsAi<G: GameState, O: Oracle<G>> {
    engine: TreeSearch<G, O>,
    /// Ply up to which the tree has been aligned with the live game.
    cursor: usize,
    last_result: Option<MctsResult<G::Action>>,
    ended: bool,
}

impl<G: GameState, O: Oracle<G>> MctsAi<G, O> {
    pub fn new(engine: TreeSearch<G, O>) -> Self {
        MctsAi {
            engine,
            cursor: 0,
            last_result: None,
            ended: false,
        }
    }

    pub fn engine(&self) -> &TreeSearch<G, O> {
        &self.engine
    }

    pub fn set_required_version(&mut self, ver: i64) {
        self.engine.set_required_version(ver);
    }

    pub fn last_result(&self) -> Option<&MctsResult<G::Action>> {
        self.last_result.as_ref()
    }

    /// Searches from `state` and returns the move summary. The caller is
    /// expected to forward the chosen action on the live game before the
    /// next call.
    pub fn act(&mut self, state: &G) -> Result<MctsResult<G::Action>, EngineError> {
        self.align(state);
        let result = self.engine.run(state)?;
        if let Some(best) = result.best_action {
            if !state.legal_actions().contains(&best) {
                warn!(
                    "search chose {:?}, which is illegal at ply {}",
                    best,
                    state.ply()
                );
                return Err(EngineError::InconsistentMove);
            }
        }
        self.last_result = Some(result.clone());
        Ok(result)
    }

    /// Closes out the game. Safe to call more than once; only the first
    /// call logs and tears down the tree.
    pub fn end_game(&mut self, final_state: &G) {
        if self.ended {
            return;
        }
        self.ended = true;
        info!(
            "game over at ply {}, reward {}",
            final_state.ply(),
            final_state.evaluate_game()
        );
        self.engine.clear();
        self.cursor = final_state.ply();
    }

    /// Replays the moves played since the cursor as tree reroots. Any
    /// reconciliation failure falls back to a fresh tree.
    fn align(&mut self, state: &G) {
        if !self.engine.options().persistent_tree {
            self.engine.clear();
            self.cursor = state.ply();
            return;
        }
        match state.moves_since(&mut self.cursor) {
            None => {
                debug!("history not reconcilable at ply {}, rebuilding tree", state.ply());
                self.engine.clear();
                self.cursor = state.ply();
            }
            Some(moves) => {
                for m in moves {
                    if self.engine.tree_is_empty() {
                        break;
                    }
                    if !self.engine.advance(m) {
                        debug!("move {m:?} not tracked by the tree, rebuilding");
                        self.engine.clear();
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{GameState, TugOfWar};
    use crate::mcts::actor::{Actor, ActorParams, UniformOracle};
    use crate::mcts::options::TsOptions;
    use std::sync::Arc;

    fn ai() -> MctsAi<TugOfWar, UniformOracle> {
        let actor = Actor::new(ActorParams::default(), Arc::new(UniformOracle::new(0)));
        MctsAi::new(TreeSearch::new(TsOptions::default().for_eval(), actor))
    }

    #[test]
    fn plays_a_full_game_with_a_persistent_tree() {
        let mut black = ai();
        let mut white = ai();
        let mut state = TugOfWar::new(2, 30);

        while !state.terminated() {
            let mover = if state.ply() % 2 == 0 {
                &mut black
            } else {
                &mut white
            };
            let result = mover.act(&state).unwrap();
            state.forward(result.best_action.unwrap()).unwrap();
        }
        black.end_game(&state);
        white.end_game(&state);
        assert!(black.engine().tree_is_empty());
    }

    #[test]
    fn end_game_is_idempotent() {
        let mut player = ai();
        let mut state = TugOfWar::new(1, 10);
        let result = player.act(&state).unwrap();
        state.forward(result.best_action.unwrap()).unwrap();
        if !state.terminated() {
            // drive to the end with whatever is legal
            while !state.terminated() {
                let a = state.legal_actions()[0];
                state.forward(a).unwrap();
            }
        }
        player.end_game(&state);
        player.end_game(&state);
        assert!(player.engine().tree_is_empty());
    }

    #[test]
    fn realigns_after_opponent_moves_it_never_searched() {
        let mut player = ai();
        let mut state = TugOfWar::new(3, 30);

        let result = player.act(&state).unwrap();
        state.forward(result.best_action.unwrap()).unwrap();
        // Opponent reply happens outside this player's searches.
        let reply = state.legal_actions()[0];
        state.forward(reply).unwrap();

        let next = player.act(&state).unwrap();
        assert!(state.legal_actions().contains(&next.best_action.unwrap()));
    }
}

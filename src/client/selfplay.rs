//! Playing one full game under a server request and packaging it as a
//! training record.

use std::sync::Arc;

use log::debug;

use crate::game::{GameState, Player};
use crate::mcts::{Actor, ActorParams, EngineError, MctsAi, Oracle, TreeSearch};
use crate::msg::{GameRecord, GameResult, MsgRequest};

fn build_ai<G: GameState, O: Oracle<G>>(
    name: &str,
    version: i64,
    request: &MsgRequest,
    oracle: Arc<O>,
) -> MctsAi<G, O> {
    let actor = Actor::new(
        ActorParams {
            name: name.to_string(),
            required_version: version,
        },
        oracle,
    );
    MctsAi::new(TreeSearch::new(request.vers.mcts_opt.clone(), actor))
}

/// Plays `start` to completion with the matchup described by `request`,
/// `black_oracle` serving the Black model and `white_oracle` the White
/// one (the same oracle for selfplay). Records every ply's search policy
/// and predicted value, both kept in Black's perspective.
pub fn play_game<G: GameState, O: Oracle<G>>(
    start: G,
    request: &MsgRequest,
    black_oracle: Arc<O>,
    white_oracle: Arc<O>,
) -> Result<GameRecord, EngineError> {
    let mut black = build_ai("black", request.vers.black_ver, request, black_oracle);
    let mut white = build_ai("white", request.vers.white_ver, request, white_oracle);
    let mut record = GameRecord::new(request.clone());
    let mut state = start;

    while !state.terminated() {
        let mover = match state.to_move() {
            Player::Black => &mut black,
            Player::White => &mut white,
        };
        let result = mover.act(&state)?;
        let Some(best) = result.best_action else {
            break;
        };

        let mut dense = vec![0.0f32; G::action_space()];
        for &(action, p) in &result.mcts_policy {
            dense[G::action_index(action) as usize] = p;
        }
        record.mcts_policies.push(dense);
        record.predicted_values.push(match state.to_move() {
            Player::Black => result.root_value,
            Player::White => -result.root_value,
        });
        record.actions.push(G::action_index(best));

        if state.forward(best).is_err() {
            return Err(EngineError::InconsistentMove);
        }
    }

    black.end_game(&state);
    white.end_game(&state);
    record.result = GameResult {
        reward: state.evaluate_game(),
        num_moves: state.ply() as u32,
    };
    debug!(
        "game finished: {} moves, reward {}",
        record.result.num_moves, record.result.reward
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::TugOfWar;
    use crate::mcts::{TsOptions, UniformOracle};
    use crate::msg::ModelPair;

    fn request() -> MsgRequest {
        MsgRequest {
            vers: ModelPair {
                black_ver: 0,
                white_ver: 0,
                mcts_opt: TsOptions {
                    num_threads: 2,
                    num_rollouts_per_thread: 10,
                    ..TsOptions::default()
                },
            },
            ..MsgRequest::default()
        }
    }

    #[test]
    fn produces_a_consistent_record() {
        let oracle = Arc::new(UniformOracle::new(0));
        let record = play_game(
            TugOfWar::new(2, 16),
            &request(),
            Arc::clone(&oracle),
            oracle,
        )
        .unwrap();

        let n = record.result.num_moves as usize;
        assert!(n > 0);
        assert_eq!(record.actions.len(), n);
        assert_eq!(record.mcts_policies.len(), n);
        assert_eq!(record.predicted_values.len(), n);
        assert!(record.request.vers.is_selfplay());
        assert!([-1.0, 0.0, 1.0].contains(&record.result.reward));
        for policy in &record.mcts_policies {
            let sum: f32 = policy.iter().sum();
            assert!((sum - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn recorded_actions_replay_to_the_same_outcome() {
        let oracle = Arc::new(UniformOracle::new(0));
        let start = TugOfWar::new(2, 16);
        let record = play_game(start.clone(), &request(), Arc::clone(&oracle), oracle).unwrap();

        let mut state = start;
        for &idx in &record.actions {
            let action = *state
                .legal_actions()
                .iter()
                .find(|&&a| TugOfWar::action_index(a) == idx)
                .expect("recorded action is legal");
            state.forward(action).unwrap();
        }
        assert!(state.terminated());
        assert_eq!(state.evaluate_game(), record.result.reward);
    }
}

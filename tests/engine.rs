//! End-to-end checks of the search engine against the bundled demo game.

use std::sync::Arc;

use draughts_zero::game::{GameState, Pull, TugOfWar};
use draughts_zero::mcts::{
    Actor, ActorParams, MctsAi, Oracle, OracleError, OracleReply, TreeSearch, TsOptions,
    UniformOracle,
};

fn ai_with<O: Oracle<TugOfWar>>(oracle: Arc<O>, opts: TsOptions) -> MctsAi<TugOfWar, O> {
    let actor = Actor::new(ActorParams::default(), oracle);
    MctsAi::new(TreeSearch::new(opts, actor))
}

#[test]
fn finds_the_immediately_winning_move() {
    // From the start of a limit-1 game, Forward wins on the spot and Back
    // loses on the spot. Any functioning search must find Forward.
    let mut ai = ai_with(Arc::new(UniformOracle::new(0)), TsOptions::default().for_eval());
    let result = ai.act(&TugOfWar::new(1, 10)).unwrap();
    assert_eq!(result.best_action, Some(Pull::Forward));
    assert!(result.best_edge_info.q > 0.5);
}

struct FailingOracle;

impl<G: GameState> Oracle<G> for FailingOracle {
    fn evaluate(&self, _states: &[G]) -> Result<Vec<OracleReply>, OracleError> {
        Err(OracleError::Unavailable("down for the test".into()))
    }
}

#[test]
fn search_survives_an_unavailable_oracle() {
    // Every evaluation fails, so the engine falls back to uniform priors
    // and zero values. The search must still finish and pick a legal move.
    let mut ai = ai_with(Arc::new(FailingOracle), TsOptions::default().for_eval());
    let state = TugOfWar::new(3, 20);
    let result = ai.act(&state).unwrap();
    assert!(state.legal_actions().contains(&result.best_action.unwrap()));
}

#[test]
fn two_engines_play_a_complete_game() {
    let oracle = Arc::new(UniformOracle::new(0));
    let opts = TsOptions {
        num_threads: 2,
        num_rollouts_per_thread: 15,
        ..TsOptions::default()
    };
    let mut black = ai_with(Arc::clone(&oracle), opts.clone());
    let mut white = ai_with(oracle, opts);

    let mut state = TugOfWar::new(2, 24);
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
    assert!([-1.0, 0.0, 1.0].contains(&state.evaluate_game()));
    assert!(black.engine().tree_is_empty());
}

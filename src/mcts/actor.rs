//! The evaluation boundary between the search and the neural network.
//!
//! An [`Actor`] owns a handle to an [`Oracle`] (the external model-serving
//! side) and turns raw oracle replies into per-node responses: it answers
//! terminal states without consulting the oracle, enforces the required
//! model version, and projects the dense policy onto the legal actions.

use std::sync::Arc;

use log::{error, info};

use crate::game::{GameState, Player};

/// Raw reply for one state: value from the to-move player's perspective,
/// a dense policy over the game's action-index space, and the version of
/// the model that produced it.
#[derive(Debug, Clone)]
pub struct OracleReply {
    pub value: f32,
    pub policy: Vec<f32>,
    pub model_version: i64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    #[error("oracle backend unavailable: {0}")]
    Unavailable(String),
}

/// The remote/async neural-network oracle. Implementations batch however
/// they like; the engine always hands over whole batches.
pub trait Oracle<G: GameState>: Send + Sync + 'static {
    fn evaluate(&self, states: &[G]) -> Result<Vec<OracleReply>, OracleError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ActorError {
    /// The serving model does not match the version this actor requires.
    /// Fatal to the current search; the game loop must rebuild the actor.
    #[error("model version {got} and required version {required} are not consistent")]
    VersionMismatch { got: i64, required: i64 },

    #[error(transparent)]
    Oracle(#[from] OracleError),
}

#[derive(Debug, Clone)]
pub struct ActorParams {
    pub name: String,
    /// Required model version. `-1` accepts any model response.
    pub required_version: i64,
}

impl Default for ActorParams {
    fn default() -> Self {
        ActorParams {
            name: "actor".to_string(),
            required_version: -1,
        }
    }
}

/// Value-and-priors answer for one node.
#[derive(Debug, Clone)]
pub struct NodeResponse<A> {
    /// From the perspective of the player to move at the evaluated state.
    pub value: f32,
    /// Legal actions with normalized priors. Empty for terminal states.
    pub pi: Vec<(A, f32)>,
}

pub struct Actor<G: GameState, O: Oracle<G>> {
    params: ActorParams,
    oracle: Arc<O>,
    _marker: std::marker::PhantomData<G>,
}

impl<G: GameState, O: Oracle<G>> Actor<G, O> {
    pub fn new(params: ActorParams, oracle: Arc<O>) -> Self {
        Actor {
            params,
            oracle,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn params(&self) -> &ActorParams {
        &self.params
    }

    pub fn set_required_version(&mut self, ver: i64) {
        self.params.required_version = ver;
    }

    /// Terminal short-circuit: a finished game is answered from its own
    /// score, with no oracle involvement and no further actions.
    pub fn pre_evaluate(&self, state: &G) -> Option<NodeResponse<G::Action>> {
        if !state.terminated() {
            return None;
        }
        Some(NodeResponse {
            value: mover_value(state, state.evaluate_game()),
            pi: Vec::new(),
        })
    }

    /// One oracle call for a whole batch of non-terminal states.
    pub fn evaluate_batch(
        &self,
        states: &[G],
    ) -> Result<Vec<NodeResponse<G::Action>>, ActorError> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let replies = self.oracle.evaluate(states)?;
        if replies.len() != states.len() {
            return Err(OracleError::Unavailable(format!(
                "[{}] oracle answered {} of {} states",
                self.params.name,
                replies.len(),
                states.len()
            ))
            .into());
        }

        let mut responses = Vec::with_capacity(states.len());
        for (state, reply) in states.iter().zip(replies) {
            self.check_version(reply.model_version)?;
            responses.push(NodeResponse {
                value: reply.value,
                pi: project_policy(state, &reply.policy),
            });
        }
        Ok(responses)
    }

    fn check_version(&self, got: i64) -> Result<(), ActorError> {
        let required = self.params.required_version;
        if required >= 0 && got != required {
            error!(
                "[{}] model version {} and required version {} are not consistent",
                self.params.name, got, required
            );
            return Err(ActorError::VersionMismatch { got, required });
        }
        Ok(())
    }
}

/// Converts a Black-perspective game reward into the perspective of the
/// player to move at `state`, mapped onto `{-1.0, 0.0, 1.0}`.
pub(crate) fn mover_value<G: GameState>(state: &G, black_reward: f32) -> f32 {
    let mapped = if black_reward > 0.0 {
        1.0
    } else if black_reward < 0.0 {
        -1.0
    } else {
        0.0
    };
    match state.to_move() {
        Player::Black => mapped,
        Player::White => -mapped,
    }
}

/// Masks the dense policy to the legal actions and renormalizes; a policy
/// with no mass on any legal action falls back to uniform priors.
fn project_policy<G: GameState>(state: &G, policy: &[f32]) -> Vec<(G::Action, f32)> {
    let legal = state.legal_actions();
    if legal.is_empty() {
        return Vec::new();
    }
    let mut pi: Vec<(G::Action, f32)> = legal
        .iter()
        .map(|&a| {
            let idx = G::action_index(a) as usize;
            let p = policy.get(idx).copied().unwrap_or(0.0).max(0.0);
            (a, p)
        })
        .collect();
    let total: f32 = pi.iter().map(|(_, p)| p).sum();
    if total <= 1e-10 {
        let uniform = 1.0 / pi.len() as f32;
        for (_, p) in &mut pi {
            *p = uniform;
        }
    } else {
        for (_, p) in &mut pi {
            *p /= total;
        }
    }
    pi
}

/// Uniform priors over `action_space()` and a configurable version. Used by
/// the demo binary and as a scripted stand-in for a real model in tests.
pub struct UniformOracle {
    version: i64,
}

impl UniformOracle {
    pub fn new(version: i64) -> Self {
        info!("uniform oracle serving as model version {version}");
        UniformOracle { version }
    }
}

impl<G: GameState> Oracle<G> for UniformOracle {
    fn evaluate(&self, states: &[G]) -> Result<Vec<OracleReply>, OracleError> {
        let k = G::action_space();
        Ok(states
            .iter()
            .map(|_| OracleReply {
                value: 0.0,
                policy: vec![1.0 / k as f32; k],
                model_version: self.version,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Pull, TugOfWar};
    use assert_matches::assert_matches;

    #[test]
    fn terminal_state_short_circuits() {
        let mut g = TugOfWar::new(1, 10);
        g.forward(Pull::Forward).unwrap();
        assert!(g.terminated());

        let actor = Actor::new(ActorParams::default(), Arc::new(UniformOracle::new(0)));
        let resp = actor.pre_evaluate(&g).unwrap();
        // Black reached the goal; White is to move at the terminal state.
        assert_eq!(resp.value, -1.0);
        assert!(resp.pi.is_empty());
    }

    #[test]
    fn non_terminal_needs_the_oracle() {
        let g = TugOfWar::new(4, 32);
        let actor = Actor::new(ActorParams::default(), Arc::new(UniformOracle::new(0)));
        assert!(actor.pre_evaluate(&g).is_none());

        let resps = actor.evaluate_batch(&[g]).unwrap();
        assert_eq!(resps.len(), 1);
        let total: f32 = resps[0].pi.iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let g = TugOfWar::new(4, 32);
        let params = ActorParams {
            required_version: 7,
            ..ActorParams::default()
        };
        let actor = Actor::new(params, Arc::new(UniformOracle::new(3)));
        assert_matches!(
            actor.evaluate_batch(&[g]),
            Err(ActorError::VersionMismatch {
                got: 3,
                required: 7
            })
        );
    }

    #[test]
    fn matching_required_version_passes() {
        let g = TugOfWar::new(4, 32);
        let params = ActorParams {
            required_version: 3,
            ..ActorParams::default()
        };
        let actor = Actor::new(params, Arc::new(UniformOracle::new(3)));
        assert!(actor.evaluate_batch(&[g]).is_ok());
    }
}

use super::{GameState, IllegalMove, Player};

/// Direction of a pull. `Forward` drags the token toward the mover's own
/// goal, `Back` concedes a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Pull {
    Forward,
    Back,
}

/// Minimal two-player game for exercising the engine: a token on
/// `-limit..=limit`, Black wins at `+limit`, White at `-limit`, draw once
/// `max_moves` plies pass. Both actions are always legal until the game
/// ends, which keeps policy bookkeeping easy to verify by hand.
#[derive(Debug, Clone)]
pub struct TugOfWar {
    position: i32,
    limit: i32,
    max_moves: usize,
    history: Vec<Pull>,
}

impl TugOfWar {
    pub fn new(limit: i32, max_moves: usize) -> Self {
        assert!(limit > 0);
        TugOfWar {
            position: 0,
            limit,
            max_moves,
            history: Vec::new(),
        }
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    fn step(&self, pull: Pull) -> i32 {
        // Black's goal is +limit, White's is -limit.
        let toward_goal = match self.to_move() {
            Player::Black => 1,
            Player::White => -1,
        };
        match pull {
            Pull::Forward => self.position + toward_goal,
            Pull::Back => self.position - toward_goal,
        }
    }
}

impl GameState for TugOfWar {
    type Action = Pull;

    fn legal_actions(&self) -> Vec<Pull> {
        if self.terminated() {
            return Vec::new();
        }
        [Pull::Forward, Pull::Back]
            .into_iter()
            .filter(|&p| self.step(p).abs() <= self.limit)
            .collect()
    }

    fn forward(&mut self, action: Pull) -> Result<(), IllegalMove> {
        if self.terminated() || self.step(action).abs() > self.limit {
            return Err(IllegalMove {
                ply: self.ply(),
                action: Self::action_index(action),
            });
        }
        self.position = self.step(action);
        self.history.push(action);
        Ok(())
    }

    fn terminated(&self) -> bool {
        self.position.abs() >= self.limit || self.history.len() >= self.max_moves
    }

    fn evaluate_game(&self) -> f32 {
        if self.position >= self.limit {
            1.0
        } else if self.position <= -self.limit {
            -1.0
        } else {
            0.0
        }
    }

    fn to_move(&self) -> Player {
        if self.history.len() % 2 == 0 {
            Player::Black
        } else {
            Player::White
        }
    }

    fn ply(&self) -> usize {
        self.history.len()
    }

    fn equals(&self, other: &Self) -> bool {
        self.position == other.position
            && self.limit == other.limit
            && self.max_moves == other.max_moves
            && self.history == other.history
    }

    fn moves_since(&self, cursor: &mut usize) -> Option<Vec<Pull>> {
        if *cursor > self.history.len() {
            return None;
        }
        let recent = self.history[*cursor..].to_vec();
        *cursor = self.history.len();
        Some(recent)
    }

    fn action_space() -> usize {
        2
    }

    fn action_index(action: Pull) -> u32 {
        match action {
            Pull::Forward => 0,
            Pull::Back => 1,
        }
    }
}

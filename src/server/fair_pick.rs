//! Spreading a fixed budget of games evenly over the clients willing to
//! play them, and tallying the outcomes.

use std::collections::HashMap;

/// Outcome of asking to register one more game with a [`Pick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterResult {
    Registered,
    /// The budget is fully handed out.
    Full,
}

/// Hands out up to `num_request` game slots, remembering which client holds
/// which so slots can be reclaimed when a client dies.
#[derive(Debug, Default)]
pub struct Pick {
    num_request: usize,
    registered: HashMap<String, usize>,
    finished: usize,
}

impl Pick {
    pub fn new(num_request: usize) -> Self {
        Pick {
            num_request,
            ..Pick::default()
        }
    }

    pub fn total_registered(&self) -> usize {
        self.registered.values().sum()
    }

    /// Slots still available: the budget minus games already finished and
    /// games currently out with a client. Finishing a game must not free
    /// its slot, only a dead client's [`release_request`](Pick::release_request) does.
    pub fn n_reg_to_go(&self) -> usize {
        self.num_request
            .saturating_sub(self.finished + self.total_registered())
    }

    pub fn n_finished(&self) -> usize {
        self.finished
    }

    pub fn register_request(&mut self, identity: &str) -> RegisterResult {
        if self.n_reg_to_go() == 0 {
            return RegisterResult::Full;
        }
        *self.registered.entry(identity.to_string()).or_insert(0) += 1;
        RegisterResult::Registered
    }

    /// Reclaims every unfinished slot held by `identity`. Called when the
    /// client is declared dead so another client can pick its games up.
    pub fn release_request(&mut self, identity: &str) -> usize {
        self.registered.remove(identity).unwrap_or(0)
    }

    pub fn record_finish(&mut self, identity: &str) {
        if let Some(n) = self.registered.get_mut(identity) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.registered.remove(identity);
            }
        }
        self.finished += 1;
    }

}

/// Win/draw/loss tally from one player's perspective.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WinCount {
    pub n_win: usize,
    pub n_draw: usize,
    pub n_lose: usize,
}

impl WinCount {
    pub fn feed(&mut self, reward: f32) {
        if reward > 0.0 {
            self.n_win += 1;
        } else if reward < 0.0 {
            self.n_lose += 1;
        } else {
            self.n_draw += 1;
        }
    }

    pub fn n_done(&self) -> usize {
        self.n_win + self.n_draw + self.n_lose
    }

    pub fn winrate(&self) -> f32 {
        let done = self.n_done();
        if done == 0 {
            0.0
        } else {
            self.n_win as f32 / done as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_finite_and_reclaimable() {
        let mut pick = Pick::new(3);
        assert_eq!(pick.register_request("a"), RegisterResult::Registered);
        assert_eq!(pick.register_request("a"), RegisterResult::Registered);
        assert_eq!(pick.register_request("b"), RegisterResult::Registered);
        assert_eq!(pick.register_request("c"), RegisterResult::Full);

        // "a" dies holding two slots; they become available again.
        assert_eq!(pick.release_request("a"), 2);
        assert_eq!(pick.n_reg_to_go(), 2);

        pick.record_finish("b");
        assert_eq!(pick.n_finished(), 1);
        assert_eq!(pick.total_registered(), 0);
    }

    #[test]
    fn finished_games_keep_their_slot() {
        let mut pick = Pick::new(2);
        assert_eq!(pick.register_request("a"), RegisterResult::Registered);
        pick.record_finish("a");
        // A finished game stays counted against the budget.
        assert_eq!(pick.n_reg_to_go(), 1);
        assert_eq!(pick.register_request("a"), RegisterResult::Registered);
        pick.record_finish("a");
        assert_eq!(pick.n_reg_to_go(), 0);
        assert_eq!(pick.register_request("a"), RegisterResult::Full);
        assert_eq!(pick.n_finished(), 2);
    }

    #[test]
    fn win_count_buckets_rewards() {
        let mut wc = WinCount::default();
        wc.feed(1.0);
        wc.feed(-1.0);
        wc.feed(0.0);
        wc.feed(1.0);
        assert_eq!(wc.n_win, 2);
        assert_eq!(wc.n_lose, 1);
        assert_eq!(wc.n_draw, 1);
        assert!((wc.winrate() - 0.5).abs() < 1e-6);
    }
}

//! Candidate-model evaluation.
//!
//! Each candidate plays the current best model over two color-swapped
//! halves so first-move advantage cancels out. A candidate is promoted on
//! the first decisive PASS verdict and discarded on NOTPASS.

use log::{info, warn};

use crate::msg::{ClientType, GameRecord, MsgRequest, ModelPair};
use crate::server::fair_pick::{Pick, RegisterResult, WinCount};
use crate::server::{FeedResult, GameOptions};

/// Extra game slots handed out per half beyond the strict requirement, so
/// a few straggling or lost games cannot stall the verdict.
const REQUEST_CUSHION: usize = 5;

/// Verdict on one candidate's evaluation so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalResult {
    /// One or both halves still lack finished games.
    Incomplete,
    /// The candidate met the winrate threshold.
    Pass,
    /// Both halves finished and the candidate fell short.
    NotPass,
}

/// One candidate-vs-best matchup, split into a normal and a color-swapped
/// half. Rewards arrive from Black's perspective and are folded into the
/// candidate's perspective before tallying.
pub struct ModelPerformance {
    best_ver: i64,
    new_ver: i64,
    games_per_half: usize,
    winrate_thres: f32,
    eval_num_threads: i64,
    /// Candidate plays Black.
    normal: Pick,
    /// Candidate plays White.
    swapped: Pick,
    wins: WinCount,
    finished: bool,
}

impl ModelPerformance {
    pub fn new(best_ver: i64, new_ver: i64, opts: &GameOptions) -> Self {
        let games_per_half = opts.eval_num_games / 2;
        ModelPerformance {
            best_ver,
            new_ver,
            games_per_half,
            winrate_thres: opts.eval_winrate_thres,
            eval_num_threads: opts.eval_num_threads,
            normal: Pick::new(games_per_half + REQUEST_CUSHION),
            swapped: Pick::new(games_per_half + REQUEST_CUSHION),
            wins: WinCount::default(),
            finished: false,
        }
    }

    pub fn new_ver(&self) -> i64 {
        self.new_ver
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Verdict is final; drop any further records for this matchup.
    pub fn set_finished(&mut self) {
        self.finished = true;
    }

    pub fn n_reg_to_go(&self) -> usize {
        if self.finished {
            0
        } else {
            self.normal.n_reg_to_go() + self.swapped.n_reg_to_go()
        }
    }

    /// Registers one more game with whichever half has more slots left, and
    /// writes the matchup into `request`. `false` when the budget of both
    /// halves is already handed out.
    pub fn fill_in_request(&mut self, identity: &str, request: &mut MsgRequest) -> bool {
        if self.finished {
            return false;
        }
        let swap = self.swapped.n_reg_to_go() > self.normal.n_reg_to_go();
        let pick = if swap { &mut self.swapped } else { &mut self.normal };
        if pick.register_request(identity) == RegisterResult::Full {
            return false;
        }
        if swap {
            request.vers.black_ver = self.best_ver;
            request.vers.white_ver = self.new_ver;
        } else {
            request.vers.black_ver = self.new_ver;
            request.vers.white_ver = self.best_ver;
        }
        request.vers.mcts_opt = request.vers.mcts_opt.for_eval();
        request.client_ctrl.client_type = ClientType::EvalThenSelfplay;
        request.client_ctrl.player_swap = swap;
        request.client_ctrl.async_mode = false;
        // Evaluation games run on a pinned thread count.
        request.client_ctrl.num_game_threads = self.eval_num_threads as i32;
        true
    }

    fn matches(&self, vers: &ModelPair, swap: bool) -> bool {
        if swap {
            vers.black_ver == self.best_ver && vers.white_ver == self.new_ver
        } else {
            vers.black_ver == self.new_ver && vers.white_ver == self.best_ver
        }
    }

    /// Tallies one finished evaluation game.
    pub fn feed(&mut self, identity: &str, record: &GameRecord) -> FeedResult {
        if self.finished {
            return FeedResult::NotRequested;
        }
        let swap = record.request.client_ctrl.player_swap;
        if !self.matches(&record.request.vers, swap) {
            return FeedResult::NotEval;
        }
        let candidate_reward = if swap {
            -record.result.reward
        } else {
            record.result.reward
        };
        self.wins.feed(candidate_reward);
        let pick = if swap { &mut self.swapped } else { &mut self.normal };
        pick.record_finish(identity);
        FeedResult::Fed
    }

    /// Both halves must deliver their full quota before a verdict is given,
    /// so a lopsided half cannot decide the matchup alone.
    pub fn eval_check(&self) -> EvalResult {
        if self.normal.n_finished() < self.games_per_half
            || self.swapped.n_finished() < self.games_per_half
        {
            return EvalResult::Incomplete;
        }
        if self.wins.winrate() >= self.winrate_thres {
            EvalResult::Pass
        } else {
            EvalResult::NotPass
        }
    }

    pub fn release_request(&mut self, identity: &str) {
        self.normal.release_request(identity);
        self.swapped.release_request(identity);
    }

    fn summary(&self) -> String {
        format!(
            "model {} vs best {}: {}-{}-{} (winrate {:.3})",
            self.new_ver,
            self.best_ver,
            self.wins.n_win,
            self.wins.n_draw,
            self.wins.n_lose,
            self.wins.winrate()
        )
    }
}

/// Queues candidate models and promotes the first one that beats the best.
pub struct EvalSubCtrl {
    options: GameOptions,
    best_ver: i64,
    performances: Vec<ModelPerformance>,
}

impl EvalSubCtrl {
    pub fn new(options: GameOptions) -> Self {
        EvalSubCtrl {
            options,
            best_ver: -1,
            performances: Vec::new(),
        }
    }

    pub fn best_model(&self) -> i64 {
        self.best_ver
    }

    /// Changing the baseline invalidates every pending matchup, since they
    /// were all measured against the old one.
    pub fn set_best_model(&mut self, ver: i64) {
        self.best_ver = ver;
        self.performances.clear();
    }

    pub fn num_pending(&self) -> usize {
        self.performances.iter().filter(|p| !p.is_finished()).count()
    }

    /// Whether a candidate submission is acceptable: it must be trained
    /// from the current best model and be strictly newer than it.
    pub fn candidate_is_valid(&self, selfplay_ver: i64, new_ver: i64) -> bool {
        selfplay_ver == self.best_ver && new_ver > selfplay_ver
    }

    /// Queues `new_ver` for evaluation against the current best.
    /// `selfplay_ver` is the model the candidate was trained from; a
    /// submission trained from a superseded model, or not newer than its
    /// own baseline, is rejected. Returns whether the candidate is queued.
    pub fn add_new_model_for_evaluation(&mut self, selfplay_ver: i64, new_ver: i64) -> bool {
        if selfplay_ver != self.best_ver {
            warn!(
                "rejecting model {new_ver}: trained from {selfplay_ver}, best is {}",
                self.best_ver
            );
            return false;
        }
        if new_ver <= selfplay_ver {
            warn!("rejecting model {new_ver}: not newer than baseline {selfplay_ver}");
            return false;
        }
        if self
            .performances
            .iter()
            .any(|p| p.new_ver() == new_ver && !p.is_finished())
        {
            return true;
        }
        info!("queueing model {new_ver} for evaluation against best {}", self.best_ver);
        self.performances
            .push(ModelPerformance::new(self.best_ver, new_ver, &self.options));
        true
    }

    /// Picks the pending candidate with the most outstanding games and
    /// registers a game for `identity`. `false` when nothing needs playing.
    pub fn fill_in_request(&mut self, identity: &str, request: &mut MsgRequest) -> bool {
        let best = self
            .performances
            .iter_mut()
            .filter(|p| !p.is_finished())
            .max_by_key(|p| p.n_reg_to_go());
        match best {
            Some(perf) => perf.fill_in_request(identity, request),
            None => false,
        }
    }

    pub fn feed(&mut self, identity: &str, record: &GameRecord) -> FeedResult {
        for perf in self.performances.iter_mut() {
            match perf.feed(identity, record) {
                FeedResult::NotEval | FeedResult::NotRequested => continue,
                fed => return fed,
            }
        }
        FeedResult::NotRequested
    }

    /// Checks every pending matchup. The first PASS promotes: the new best
    /// version is returned and all other pending matchups are dropped,
    /// since they were measured against a best model that no longer holds
    /// the title. NOTPASS candidates are discarded.
    pub fn check_new_model(&mut self) -> Option<i64> {
        let mut promoted = None;
        for perf in self.performances.iter_mut() {
            if perf.is_finished() {
                continue;
            }
            match perf.eval_check() {
                EvalResult::Incomplete => {}
                EvalResult::Pass => {
                    info!("PASS: {}", perf.summary());
                    perf.set_finished();
                    promoted = Some(perf.new_ver());
                    break;
                }
                EvalResult::NotPass => {
                    info!("NOTPASS: {}", perf.summary());
                    perf.set_finished();
                }
            }
        }
        if let Some(ver) = promoted {
            self.best_ver = ver;
            self.performances.clear();
        } else {
            self.performances.retain(|p| !p.is_finished());
        }
        promoted
    }

    /// Reclaims game slots held by a dead client.
    pub fn release_requests(&mut self, identity: &str) {
        for perf in self.performances.iter_mut() {
            perf.release_request(identity);
        }
    }

    /// Rough count of evaluation machines needed to drain the pending
    /// matchups, assuming one machine covers one candidate's game budget.
    pub fn compute_num_eval_machine(&self) -> usize {
        let to_go: usize = self.performances.iter().map(|p| p.n_reg_to_go()).sum();
        let per_machine = self.options.eval_num_games.max(1);
        to_go.div_ceil(per_machine)
    }
}

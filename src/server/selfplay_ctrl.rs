//! Selfplay sample accounting.
//!
//! One [`SelfPlayRecord`] per model version counts the games played under
//! that version; the controller tells the training loop whether it has
//! gathered enough fresh games to justify another weight update.

use log::info;

use crate::msg::{ClientType, GameRecord, MsgRequest};
use crate::server::GameOptions;
use std::collections::HashMap;

/// Verdict on one incoming selfplay record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlResult {
    /// Played under a version older than the current model. Not counted.
    VersionOld,
    /// Not a selfplay record, or a version the server never issued.
    VersionInvalid,
    /// Counted, but the current model still needs more games.
    InsufficientSample,
    /// Counted, and the current model has enough games.
    SufficientSample,
}

/// Log a throughput summary every this many games.
const CHECKPOINT_EVERY: i64 = 1000;

/// Per-version tally of received selfplay games.
#[derive(Debug, Default)]
pub struct SelfPlayRecord {
    counter: i64,
    black_wins: i64,
    draws: i64,
    white_wins: i64,
    /// Game-length histogram: [0,100), [100,200), [200,300), 300+.
    move_buckets: [i64; 4],
    num_weight_update: i64,
}

impl SelfPlayRecord {
    pub fn counter(&self) -> i64 {
        self.counter
    }

    pub fn num_weight_update(&self) -> i64 {
        self.num_weight_update
    }

    fn feed(&mut self, reward: f32, num_moves: u32) {
        self.counter += 1;
        if reward > 0.0 {
            self.black_wins += 1;
        } else if reward < 0.0 {
            self.white_wins += 1;
        } else {
            self.draws += 1;
        }
        let bucket = (num_moves / 100).min(3) as usize;
        self.move_buckets[bucket] += 1;
    }

    fn is_check_point(&self) -> bool {
        self.counter > 0 && self.counter % CHECKPOINT_EVERY == 0
    }

    /// Whether this model still needs more games before the next weight
    /// update. The initial batch is gated on `selfplay_init_num`; each
    /// completed update raises the bar by `selfplay_update_num`.
    fn need_wait(&self, opts: &GameOptions) -> bool {
        if opts.selfplay_init_num <= 0 {
            return false;
        }
        if self.counter < opts.selfplay_init_num {
            return true;
        }
        if opts.selfplay_update_num <= 0 {
            return false;
        }
        self.counter < opts.selfplay_init_num + opts.selfplay_update_num * self.num_weight_update
    }

    fn summary(&self) -> String {
        format!(
            "n={} b/d/w={}/{}/{} updates={} moves[<100]={} [100,200)={} [200,300)={} [300+]={}",
            self.counter,
            self.black_wins,
            self.draws,
            self.white_wins,
            self.num_weight_update,
            self.move_buckets[0],
            self.move_buckets[1],
            self.move_buckets[2],
            self.move_buckets[3]
        )
    }
}

/// Tracks selfplay throughput per model version and gates weight updates
/// on sample sufficiency.
pub struct SelfPlaySubCtrl {
    options: GameOptions,
    records: HashMap<i64, SelfPlayRecord>,
    curr_ver: i64,
}

impl SelfPlaySubCtrl {
    pub fn new(options: GameOptions) -> Self {
        SelfPlaySubCtrl {
            options,
            records: HashMap::new(),
            curr_ver: -1,
        }
    }

    pub fn current_model(&self) -> i64 {
        self.curr_ver
    }

    /// Switches selfplay over to a freshly promoted model.
    pub fn set_current_model(&mut self, ver: i64) {
        if ver == self.curr_ver {
            return;
        }
        if let Some(old) = self.records.get(&self.curr_ver) {
            info!("retiring model {}: {}", self.curr_ver, old.summary());
        }
        self.curr_ver = ver;
        self.records.entry(ver).or_default();
        info!("selfplay now runs model {ver}");
    }

    pub fn feed(&mut self, record: &GameRecord) -> CtrlResult {
        if !record.request.vers.is_selfplay() {
            return CtrlResult::VersionInvalid;
        }
        let ver = record.request.vers.black_ver;
        if ver < self.curr_ver {
            return CtrlResult::VersionOld;
        }
        if ver > self.curr_ver {
            return CtrlResult::VersionInvalid;
        }
        let entry = self.records.entry(ver).or_default();
        entry.feed(record.result.reward, record.result.num_moves);
        if entry.is_check_point() {
            info!("model {ver}: {}", entry.summary());
        }
        if entry.need_wait(&self.options) {
            CtrlResult::InsufficientSample
        } else {
            CtrlResult::SufficientSample
        }
    }

    /// Whether the training loop should hold off its next weight update.
    pub fn need_wait_for_more_sample(&self) -> bool {
        self.records
            .get(&self.curr_ver)
            .map(|r| r.need_wait(&self.options))
            .unwrap_or(true)
    }

    /// The trainer finished one weight update; raise the sample bar.
    pub fn notify_current_weight_update(&mut self) {
        if let Some(r) = self.records.get_mut(&self.curr_ver) {
            r.num_weight_update += 1;
        }
    }

    pub fn total_games(&self, ver: i64) -> i64 {
        self.records.get(&ver).map(|r| r.counter()).unwrap_or(0)
    }

    /// Fills a request for a selfplay game under the current model, or a
    /// waiting request when no model has been announced yet.
    pub fn fill_in_request(&self, request: &mut MsgRequest) {
        request.client_ctrl.client_type = ClientType::SelfplayOnly;
        request.client_ctrl.async_mode = self.options.selfplay_async;
        request.client_ctrl.player_swap = false;
        if self.curr_ver < 0 {
            request.vers.set_wait();
        } else {
            request.vers.black_ver = self.curr_ver;
            request.vers.white_ver = self.curr_ver;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{GameResult, ModelPair};

    fn selfplay_record(ver: i64, num_moves: u32) -> GameRecord {
        let mut rec = GameRecord::new(MsgRequest {
            vers: ModelPair {
                black_ver: ver,
                white_ver: ver,
                ..ModelPair::default()
            },
            ..MsgRequest::default()
        });
        rec.result = GameResult {
            reward: 1.0,
            num_moves,
        };
        rec
    }

    fn ctrl(init: i64, update: i64) -> SelfPlaySubCtrl {
        let mut ctrl = SelfPlaySubCtrl::new(GameOptions {
            selfplay_init_num: init,
            selfplay_update_num: update,
            ..GameOptions::default()
        });
        ctrl.set_current_model(0);
        ctrl
    }

    #[test]
    fn gate_flips_at_exactly_init_num_and_stays_flipped() {
        let mut ctrl = ctrl(3, 2);
        assert!(ctrl.need_wait_for_more_sample());
        assert_eq!(ctrl.feed(&selfplay_record(0, 50)), CtrlResult::InsufficientSample);
        assert_eq!(ctrl.feed(&selfplay_record(0, 50)), CtrlResult::InsufficientSample);
        assert_eq!(ctrl.feed(&selfplay_record(0, 50)), CtrlResult::SufficientSample);
        assert!(!ctrl.need_wait_for_more_sample());
        // More games never re-raise the bar on their own.
        assert_eq!(ctrl.feed(&selfplay_record(0, 50)), CtrlResult::SufficientSample);
    }

    #[test]
    fn weight_update_raises_the_bar_again() {
        let mut ctrl = ctrl(2, 2);
        ctrl.feed(&selfplay_record(0, 10));
        ctrl.feed(&selfplay_record(0, 10));
        assert!(!ctrl.need_wait_for_more_sample());

        ctrl.notify_current_weight_update();
        assert!(ctrl.need_wait_for_more_sample());
        ctrl.feed(&selfplay_record(0, 10));
        ctrl.feed(&selfplay_record(0, 10));
        assert!(!ctrl.need_wait_for_more_sample());
    }

    #[test]
    fn mismatched_versions_are_rejected() {
        let mut ctrl = ctrl(2, 2);
        ctrl.set_current_model(5);
        assert_eq!(ctrl.feed(&selfplay_record(4, 10)), CtrlResult::VersionOld);
        assert_eq!(ctrl.feed(&selfplay_record(6, 10)), CtrlResult::VersionInvalid);

        let mut eval_style = selfplay_record(5, 10);
        eval_style.request.vers.white_ver = 4;
        assert_eq!(ctrl.feed(&eval_style), CtrlResult::VersionInvalid);
    }

    #[test]
    fn zero_init_never_waits() {
        let ctrl = ctrl(0, 2);
        assert!(!ctrl.need_wait_for_more_sample());
    }

    #[test]
    fn wait_request_before_a_model_exists() {
        let ctrl = SelfPlaySubCtrl::new(GameOptions::default());
        let mut req = MsgRequest::default();
        ctrl.fill_in_request(&mut req);
        assert!(req.vers.wait());
    }
}

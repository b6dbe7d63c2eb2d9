//! The top-level training controller.
//!
//! Glues the sub-controllers together: incoming record batches update
//! client liveness, feed the selfplay ledger or an evaluation matchup,
//! land in the replay buffer, and may flip the best model. Outgoing
//! requests are dispatched by client role, with evaluation work taking
//! priority for eval-capable clients.

use log::{info, warn};

use crate::msg::{ClientType, GameRecord, MsgRequest, MsgRequestSeq, Records};
use crate::server::client_manager::ClientManager;
use crate::server::eval_ctrl::EvalSubCtrl;
use crate::server::record_sink::RecordSink;
use crate::server::replay_buffer::ReplayBuffer;
use crate::server::selfplay_ctrl::{CtrlResult, SelfPlaySubCtrl};
use crate::server::{FeedResult, GameOptions};

pub struct TrainCtrl {
    options: GameOptions,
    clients: ClientManager,
    selfplay: SelfPlaySubCtrl,
    eval: EvalSubCtrl,
    replay: ReplayBuffer,
    sink: Option<RecordSink>,
    seq: i64,
}

impl TrainCtrl {
    pub fn new(options: GameOptions) -> Self {
        let clients = ClientManager::new(
            options.selfplay_only_ratio,
            options.max_num_eval,
            options.client_ttl_secs,
        );
        Self::with_client_manager(options, clients)
    }

    /// Constructor with an externally built [`ClientManager`], used by
    /// tests that inject a fake clock.
    pub fn with_client_manager(options: GameOptions, clients: ClientManager) -> Self {
        let replay = ReplayBuffer::new(options.replay_capacity);
        TrainCtrl {
            selfplay: SelfPlaySubCtrl::new(options.clone()),
            eval: EvalSubCtrl::new(options.clone()),
            options,
            clients,
            replay,
            sink: None,
            seq: 0,
        }
    }

    /// Also persist every accepted record to a `.jsonl` file under `dir`.
    pub fn set_record_dir(&mut self, dir: impl AsRef<std::path::Path>) -> crate::Result<()> {
        self.sink = Some(RecordSink::new(dir)?);
        Ok(())
    }

    pub fn current_model(&self) -> i64 {
        self.selfplay.current_model()
    }

    pub fn best_model(&self) -> i64 {
        self.eval.best_model()
    }

    pub fn replay_buffer(&self) -> &ReplayBuffer {
        &self.replay
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    /// Announces the model the run starts from. Both selfplay and the
    /// evaluation gate measure against it until a candidate is promoted.
    pub fn set_initial_version(&mut self, ver: i64) {
        info!("initial model version {ver}");
        self.selfplay.set_current_model(ver);
        self.eval.set_best_model(ver);
    }

    /// Turns the fleet into a pure evaluation farm.
    pub fn set_eval_mode(&mut self) {
        info!("eval mode: every client becomes an evaluator");
        self.clients.set_selfplay_only_ratio(0.0);
    }

    /// Candidates still being evaluated.
    pub fn num_pending_eval(&self) -> usize {
        self.eval.num_pending()
    }

    pub fn need_wait_for_more_sample(&self) -> bool {
        self.selfplay.need_wait_for_more_sample()
    }

    pub fn notify_current_weight_update(&mut self) {
        self.selfplay.notify_current_weight_update();
    }

    /// Hands the trainer's freshly exported model to the evaluation gate.
    /// `selfplay_ver` is the model it was trained from; stale or regressive
    /// exports are rejected. With evaluation disabled, an accepted
    /// candidate is promoted on the spot. Returns whether it was accepted.
    pub fn add_new_model_for_evaluation(&mut self, selfplay_ver: i64, new_ver: i64) -> bool {
        if self.options.eval_num_games == 0 {
            if !self.eval.candidate_is_valid(selfplay_ver, new_ver) {
                warn!("rejecting model {new_ver} trained from {selfplay_ver}");
                return false;
            }
            info!("evaluation disabled, promoting model {new_ver} directly");
            self.eval.set_best_model(new_ver);
            self.selfplay.set_current_model(new_ver);
            true
        } else {
            self.eval.add_new_model_for_evaluation(selfplay_ver, new_ver)
        }
    }

    /// Rough count of evaluation machines needed for the pending matchups.
    pub fn num_eval_machines_needed(&self) -> usize {
        self.eval.compute_num_eval_machine()
    }

    /// Ingests one batch of records from a client. Returns the number of
    /// games that entered the replay buffer.
    pub fn on_receive(&mut self, mut records: Records) -> crate::Result<usize> {
        let offline = records.identity.is_empty();
        if !offline {
            self.clients.get_client(&records.identity);
            self.clients
                .update_thread_states(&records.identity, &records.states);
        }
        for identity in self.clients.update_states() {
            self.eval.release_requests(&identity);
        }

        let mut inserted = 0;
        for mut record in records.records.drain(..) {
            record.offline |= offline;
            if record.offline || record.request.vers.is_selfplay() {
                if self.feed_selfplay(record) {
                    inserted += 1;
                }
            } else {
                match self.eval.feed(&records.identity, &record) {
                    FeedResult::Fed => {}
                    other => {
                        warn!("discarding eval record {}: {other:?}", record.request.vers);
                    }
                }
            }
        }

        if let Some(new_best) = self.eval.check_new_model() {
            info!("model {new_best} promoted to best");
            self.selfplay.set_current_model(new_best);
            if !self.options.keep_prev_selfplay {
                self.replay.clear();
            }
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.flush()?;
        }
        Ok(inserted)
    }

    /// Selfplay game outcomes still teach something even when the model
    /// moved on mid-game, so stale versions land in the replay buffer too.
    fn feed_selfplay(&mut self, record: GameRecord) -> bool {
        let verdict = if record.offline {
            CtrlResult::SufficientSample
        } else {
            self.selfplay.feed(&record)
        };
        match verdict {
            CtrlResult::VersionInvalid => false,
            CtrlResult::VersionOld
            | CtrlResult::InsufficientSample
            | CtrlResult::SufficientSample => {
                if let Some(sink) = self.sink.as_mut() {
                    if let Err(e) = sink.write(&record) {
                        warn!("failed to persist record: {e}");
                    }
                }
                self.replay.insert(record);
                true
            }
        }
    }

    /// Builds the next request for `identity`, stamped with a fresh
    /// sequence number. Eval-capable clients drain pending evaluation
    /// games first and fall back to selfplay.
    pub fn fill_in_request(&mut self, identity: &str) -> MsgRequestSeq {
        let client_type = self.clients.get_client(identity);
        let mut request = MsgRequest::default();
        let filled_eval = client_type == ClientType::EvalThenSelfplay
            && self.eval.fill_in_request(identity, &mut request);
        if !filled_eval {
            self.selfplay.fill_in_request(&mut request);
        }
        self.seq += 1;
        MsgRequestSeq {
            seq: self.seq,
            request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::GameResult;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn ctrl_with(options: GameOptions) -> TrainCtrl {
        let clock = Arc::new(AtomicU64::new(0));
        let clients = ClientManager::with_timer(
            options.selfplay_only_ratio,
            options.max_num_eval,
            options.client_ttl_secs,
            Box::new(move || clock.load(Ordering::SeqCst)),
        );
        TrainCtrl::with_client_manager(options, clients)
    }

    fn ctrl(eval_games: usize) -> TrainCtrl {
        ctrl_with(GameOptions {
            selfplay_init_num: 2,
            selfplay_update_num: 1,
            eval_num_games: eval_games,
            eval_winrate_thres: 0.55,
            selfplay_only_ratio: 0.5,
            replay_capacity: 100,
            ..GameOptions::default()
        })
    }

    fn finish(req: &MsgRequestSeq, reward: f32) -> GameRecord {
        let mut rec = GameRecord::new(req.request.clone());
        rec.result = GameResult {
            reward,
            num_moves: 30,
        };
        rec
    }

    fn batch(identity: &str, records: Vec<GameRecord>) -> Records {
        let mut b = Records::new(identity);
        b.records = records;
        b
    }

    #[test]
    fn full_promotion_cycle() {
        let mut ctrl = ctrl(4);
        ctrl.set_initial_version(0);

        // Client "sp" plays selfplay until the sample gate opens.
        assert!(ctrl.need_wait_for_more_sample());
        for _ in 0..2 {
            let req = ctrl.fill_in_request("sp");
            assert!(req.request.vers.is_selfplay());
            ctrl.on_receive(batch("sp", vec![finish(&req, 1.0)])).unwrap();
        }
        assert!(!ctrl.need_wait_for_more_sample());
        assert_eq!(ctrl.replay_buffer().len(), 2);

        // The trainer exports version 1; an eval client drives the verdict.
        ctrl.notify_current_weight_update();
        assert!(ctrl.add_new_model_for_evaluation(0, 1));
        assert!(ctrl.num_eval_machines_needed() >= 1);
        for _ in 0..4 {
            let req = ctrl.fill_in_request("ev");
            assert!(!req.request.vers.is_selfplay());
            // Candidate wins every game regardless of color.
            let reward = if req.request.client_ctrl.player_swap {
                -1.0
            } else {
                1.0
            };
            ctrl.on_receive(batch("ev", vec![finish(&req, reward)])).unwrap();
        }
        assert_eq!(ctrl.best_model(), 1);
        assert_eq!(ctrl.current_model(), 1);
    }

    #[test]
    fn eval_disabled_promotes_directly() {
        let mut ctrl = ctrl(0);
        ctrl.set_initial_version(0);
        // A candidate not trained from the current best is refused even
        // when evaluation is off.
        assert!(!ctrl.add_new_model_for_evaluation(1, 3));
        assert_eq!(ctrl.best_model(), 0);

        assert!(ctrl.add_new_model_for_evaluation(0, 3));
        assert_eq!(ctrl.best_model(), 3);
        assert_eq!(ctrl.current_model(), 3);
    }

    #[test]
    fn offline_records_bypass_version_checks() {
        let mut ctrl = ctrl(4);
        ctrl.set_initial_version(5);

        let req = ctrl.fill_in_request("sp");
        let mut rec = finish(&req, 0.0);
        rec.request.vers.black_ver = 1; // long-stale version
        rec.request.vers.white_ver = 1;
        let inserted = ctrl.on_receive(batch("", vec![rec])).unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(ctrl.replay_buffer().len(), 1);
    }

    #[test]
    fn stale_selfplay_still_lands_in_replay() {
        let mut ctrl = ctrl(4);
        ctrl.set_initial_version(0);
        let req = ctrl.fill_in_request("sp");
        ctrl.set_initial_version(1); // model moved on mid-game

        let inserted = ctrl.on_receive(batch("sp", vec![finish(&req, 1.0)])).unwrap();
        assert_eq!(inserted, 1);
        // Stale games count for replay but not for the new model's gate.
        assert!(ctrl.need_wait_for_more_sample());
    }

    #[test]
    fn promotion_discards_old_selfplay_when_configured() {
        let mut ctrl = ctrl_with(GameOptions {
            selfplay_init_num: 2,
            selfplay_update_num: 1,
            eval_num_games: 4,
            eval_winrate_thres: 0.55,
            selfplay_only_ratio: 0.5,
            replay_capacity: 100,
            keep_prev_selfplay: false,
            ..GameOptions::default()
        });
        ctrl.set_initial_version(0);

        for _ in 0..2 {
            let req = ctrl.fill_in_request("sp");
            ctrl.on_receive(batch("sp", vec![finish(&req, 1.0)])).unwrap();
        }
        assert_eq!(ctrl.replay_buffer().len(), 2);

        ctrl.notify_current_weight_update();
        assert!(ctrl.add_new_model_for_evaluation(0, 1));
        for _ in 0..4 {
            let req = ctrl.fill_in_request("ev");
            let reward = if req.request.client_ctrl.player_swap {
                -1.0
            } else {
                1.0
            };
            ctrl.on_receive(batch("ev", vec![finish(&req, reward)])).unwrap();
        }
        assert_eq!(ctrl.best_model(), 1);

        // Games from the previous model are dropped on promotion, but the
        // insertion counter survives.
        assert!(ctrl.replay_buffer().is_empty());
        assert_eq!(ctrl.replay_buffer().total_inserted(), 2);
    }

    #[test]
    fn requests_carry_increasing_sequence_numbers() {
        let mut ctrl = ctrl(4);
        ctrl.set_initial_version(0);
        let a = ctrl.fill_in_request("sp");
        let b = ctrl.fill_in_request("sp");
        assert!(b.seq > a.seq);
    }
}

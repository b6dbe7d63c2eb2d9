//! Client bookkeeping: who is connected, what role each client plays, and
//! who went silent.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};

use crate::msg::{ClientType, ThreadState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Alive,
    Dead,
}

#[derive(Debug)]
struct ClientInfo {
    client_type: ClientType,
    last_seen: u64,
    state: ClientState,
    /// Last reported state of each of the client's game threads.
    thread_states: BTreeMap<usize, ThreadState>,
}

/// Assigns a role to each client and tracks its liveness.
///
/// Roles are handed out to keep `selfplay_only_ratio` of the fleet on
/// selfplay duty; the remainder doubles as evaluation workers. A client
/// that goes quiet for longer than the TTL is declared dead and its role
/// is returned to the pool; it gets a fresh role if it ever comes back.
pub struct ClientManager {
    clients: HashMap<String, ClientInfo>,
    num_selfplay: usize,
    num_eval: usize,
    selfplay_only_ratio: f32,
    max_num_eval: i64,
    ttl_secs: u64,
    now: Box<dyn Fn() -> u64 + Send>,
}

fn wall_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl ClientManager {
    pub fn new(selfplay_only_ratio: f32, max_num_eval: i64, ttl_secs: u64) -> Self {
        Self::with_timer(selfplay_only_ratio, max_num_eval, ttl_secs, Box::new(wall_clock))
    }

    /// Like [`ClientManager::new`] but with an injected clock, so liveness
    /// can be tested without sleeping.
    pub fn with_timer(
        selfplay_only_ratio: f32,
        max_num_eval: i64,
        ttl_secs: u64,
        now: Box<dyn Fn() -> u64 + Send>,
    ) -> Self {
        ClientManager {
            clients: HashMap::new(),
            num_selfplay: 0,
            num_eval: 0,
            selfplay_only_ratio,
            max_num_eval,
            ttl_secs,
            now,
        }
    }

    pub fn num_selfplay(&self) -> usize {
        self.num_selfplay
    }

    pub fn num_eval(&self) -> usize {
        self.num_eval
    }

    /// Evaluation-only fleets set the ratio to zero so every client gets
    /// eval duty.
    pub fn set_selfplay_only_ratio(&mut self, ratio: f32) {
        self.selfplay_only_ratio = ratio;
    }

    /// Role of `identity`, assigning one on first contact and refreshing
    /// the liveness timestamp. A client that was declared dead gets a
    /// newly allocated role.
    pub fn get_client(&mut self, identity: &str) -> ClientType {
        let ts = (self.now)();
        if let Some(info) = self.clients.get_mut(identity) {
            info.last_seen = ts;
            if info.state == ClientState::Dead {
                info.state = ClientState::Alive;
                info.client_type = Self::alloc(
                    self.num_selfplay,
                    self.num_eval,
                    self.selfplay_only_ratio,
                    self.max_num_eval,
                );
                match info.client_type {
                    ClientType::EvalThenSelfplay => self.num_eval += 1,
                    _ => self.num_selfplay += 1,
                }
                info!("client {identity} came back, reassigned as {:?}", info.client_type);
            }
            return self.clients[identity].client_type;
        }

        let client_type = Self::alloc(
            self.num_selfplay,
            self.num_eval,
            self.selfplay_only_ratio,
            self.max_num_eval,
        );
        match client_type {
            ClientType::EvalThenSelfplay => self.num_eval += 1,
            _ => self.num_selfplay += 1,
        }
        info!("new client {identity} assigned as {client_type:?}");
        self.clients.insert(
            identity.to_string(),
            ClientInfo {
                client_type,
                last_seen: ts,
                state: ClientState::Alive,
                thread_states: BTreeMap::new(),
            },
        );
        client_type
    }

    pub fn client_state(&self, identity: &str) -> Option<ClientState> {
        self.clients.get(identity).map(|c| c.state)
    }

    pub fn client_type(&self, identity: &str) -> Option<ClientType> {
        self.clients.get(identity).map(|c| c.client_type)
    }

    /// Records the thread states a client sent with its latest batch.
    pub fn update_thread_states(&mut self, identity: &str, states: &BTreeMap<usize, ThreadState>) {
        if let Some(info) = self.clients.get_mut(identity) {
            for (&thread_id, &state) in states {
                info.thread_states.insert(thread_id, state);
            }
        }
    }

    pub fn thread_states(&self, identity: &str) -> Option<&BTreeMap<usize, ThreadState>> {
        self.clients.get(identity).map(|c| &c.thread_states)
    }

    /// Sweeps for clients past the TTL, returning the identities newly
    /// declared dead so their pending work can be reclaimed.
    pub fn update_states(&mut self) -> Vec<String> {
        let ts = (self.now)();
        let mut died = Vec::new();
        for (identity, info) in self.clients.iter_mut() {
            if info.state == ClientState::Alive
                && ts.saturating_sub(info.last_seen) >= self.ttl_secs
            {
                info.state = ClientState::Dead;
                match info.client_type {
                    ClientType::EvalThenSelfplay => self.num_eval -= 1,
                    _ => self.num_selfplay -= 1,
                }
                warn!("client {identity} silent for {}s, declared dead", self.ttl_secs);
                died.push(identity.clone());
            }
        }
        died
    }

    fn alloc(
        num_selfplay: usize,
        num_eval: usize,
        selfplay_only_ratio: f32,
        max_num_eval: i64,
    ) -> ClientType {
        let curr_ratio =
            num_selfplay as f32 / (num_selfplay as f32 + num_eval as f32 + 1e-10);
        let eval_capped = max_num_eval >= 0 && num_eval >= max_num_eval as usize;
        if curr_ratio >= selfplay_only_ratio && !eval_capped {
            ClientType::EvalThenSelfplay
        } else {
            ClientType::SelfplayOnly
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn manager_at(clock: Arc<AtomicU64>, ratio: f32, max_eval: i64) -> ClientManager {
        let now = Box::new(move || clock.load(Ordering::SeqCst));
        ClientManager::with_timer(ratio, max_eval, 300, now)
    }

    #[test]
    fn ten_clients_at_ratio_point_nine_yield_one_eval() {
        let clock = Arc::new(AtomicU64::new(0));
        let mut mgr = manager_at(clock, 0.9, -1);
        let mut evals = 0;
        for i in 0..10 {
            if mgr.get_client(&format!("c{i}")) == ClientType::EvalThenSelfplay {
                evals += 1;
            }
        }
        assert_eq!(evals, 1);
        assert_eq!(mgr.num_selfplay(), 9);
        assert_eq!(mgr.num_eval(), 1);
    }

    #[test]
    fn eval_cap_wins_over_ratio() {
        let clock = Arc::new(AtomicU64::new(0));
        let mut mgr = manager_at(clock, 0.0, 0);
        // Ratio zero would make everyone an evaluator, but the cap is zero.
        for i in 0..4 {
            assert_eq!(mgr.get_client(&format!("c{i}")), ClientType::SelfplayOnly);
        }
        assert_eq!(mgr.num_eval(), 0);
    }

    #[test]
    fn silent_client_dies_and_gets_a_fresh_role_on_return() {
        let clock = Arc::new(AtomicU64::new(1000));
        let mut mgr = manager_at(Arc::clone(&clock), 0.9, -1);
        mgr.get_client("a");
        mgr.get_client("b");
        assert_eq!(mgr.num_selfplay() + mgr.num_eval(), 2);

        // One second short of the TTL everybody is still alive.
        clock.store(1000 + 299, Ordering::SeqCst);
        assert!(mgr.update_states().is_empty());
        assert_eq!(mgr.num_selfplay() + mgr.num_eval(), 2);

        // The boundary is inclusive: exactly at the TTL is dead.
        clock.store(1000 + 300, Ordering::SeqCst);
        let died = mgr.update_states();
        assert_eq!(died.len(), 2);
        assert_eq!(mgr.num_selfplay() + mgr.num_eval(), 0);
        assert_eq!(mgr.client_state("a"), Some(ClientState::Dead));

        // Reappearing client is treated as a fresh allocation.
        mgr.get_client("a");
        assert_eq!(mgr.client_state("a"), Some(ClientState::Alive));
        assert_eq!(mgr.num_selfplay() + mgr.num_eval(), 1);
    }
}

//! Deciding what a running game thread does with a fresh server request.
//!
//! A request can be a no-op (already seen), a wait order, a silent
//! acknowledgement, a background model swap, or a full restart. Restarts
//! are avoided whenever the running game is still valid under the new
//! request, since abandoning games wastes selfplay throughput.

use log::debug;

use crate::msg::{MsgRequest, MsgRequestSeq, RestartReply};

/// What the dispatcher decided for one incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub reply: RestartReply,
    /// The current game must be abandoned and restarted under the new
    /// request.
    pub restart: bool,
}

/// Per-game-thread request tracker.
#[derive(Default)]
pub struct RequestDispatcher {
    current: Option<MsgRequest>,
    last_seq: i64,
    waiting: bool,
    async_pending: bool,
}

impl RequestDispatcher {
    pub fn new() -> Self {
        RequestDispatcher {
            current: None,
            last_seq: -1,
            waiting: true,
            async_pending: false,
        }
    }

    pub fn current_request(&self) -> Option<&MsgRequest> {
        self.current.as_ref()
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Called once the background model swap promised by an
    /// [`RestartReply::UpdateModelAsync`] directive has finished loading.
    /// Returns the confirmation to send, or `None` when no swap was in
    /// flight.
    pub fn complete_async_update(&mut self) -> Option<RestartReply> {
        if self.async_pending {
            self.async_pending = false;
            Some(RestartReply::UpdateComplete)
        } else {
            None
        }
    }

    pub fn on_receive(&mut self, msg: &MsgRequestSeq) -> Directive {
        if msg.seq <= self.last_seq {
            return Directive {
                reply: RestartReply::NoOp,
                restart: false,
            };
        }
        self.last_seq = msg.seq;
        let request = &msg.request;

        if request.vers.wait() {
            self.waiting = true;
            return Directive {
                reply: RestartReply::OnlyWait,
                restart: false,
            };
        }

        let async_mode = request.client_ctrl.async_mode;
        let (same_vers, same_swap) = match self.current.as_ref() {
            Some(cur) => (
                cur.vers == request.vers,
                cur.client_ctrl.player_swap == request.client_ctrl.player_swap,
            ),
            None => (false, false),
        };
        let was_waiting = self.waiting;
        self.waiting = false;

        // A game survives the request when the matchup it plays is still
        // the requested one (or the swap happens in the background), the
        // colors did not flip, and the thread was not idle anyway.
        let no_restart = (same_vers || async_mode) && same_swap && !was_waiting;

        self.current = Some(request.clone());
        if !no_restart {
            debug!("seq {}: restarting under {}", msg.seq, request.vers);
            return Directive {
                reply: RestartReply::UpdateModel,
                restart: true,
            };
        }
        if async_mode && !same_vers {
            self.async_pending = true;
            Directive {
                reply: RestartReply::UpdateModelAsync,
                restart: false,
            }
        } else {
            Directive {
                reply: RestartReply::UpdateRequestOnly,
                restart: false,
            }
        }
    }
}

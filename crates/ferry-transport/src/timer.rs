//! # Retransmit Timer
//!
//! A connection owns exactly one [`RetransmitTimer`]. It is a single slot:
//! arming replaces whatever deadline was armed before, so two timers can
//! never be outstanding for the same connection. Every arm hands out a fresh
//! [`TimerToken`]; a fire is only honoured for the token that is currently
//! armed, so a superseded or cancelled deadline can never act.
//!
//! The timer does no scheduling of its own. The owner of the event loop asks
//! for the earliest deadline (`Dispatcher::poll_timeout`) and reports expiry
//! back (`Dispatcher::handle_timeouts`).

use quanta::Instant;
use std::time::Duration;

/// Identifies one arming of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

#[derive(Debug, Clone, Copy)]
struct Armed {
    token: TimerToken,
    deadline: Instant,
}

#[derive(Debug, Default)]
pub struct RetransmitTimer {
    armed: Option<Armed>,
    next_token: u64,
}

impl RetransmitTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for `timeout` from `now`, cancelling any previous deadline.
    pub fn arm(&mut self, now: Instant, timeout: Duration) -> TimerToken {
        let token = TimerToken(self.next_token);
        self.next_token += 1;
        self.armed = Some(Armed {
            token,
            deadline: now + timeout,
        });
        token
    }

    /// Disarm. Returns the token that was cancelled, if any.
    pub fn cancel(&mut self) -> Option<TimerToken> {
        self.armed.take().map(|a| a.token)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.map(|a| a.deadline)
    }

    pub fn token(&self) -> Option<TimerToken> {
        self.armed.map(|a| a.token)
    }

    /// Whether the armed deadline has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.armed.is_some_and(|a| a.deadline <= now)
    }

    /// Consume an expired arming. The timer is left disarmed; the caller
    /// re-arms it if the guarded segment is still outstanding.
    pub fn take_expired(&mut self, now: Instant) -> Option<TimerToken> {
        if self.is_expired(now) {
            self.cancel()
        } else {
            None
        }
    }
}

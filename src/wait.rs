//! Bounded waits for join, transmit and receive.
//!
//! A [`Deadline`] is computed once when the wait starts and checked after
//! every poll. A zero timeout means the wait never expires.

use std::time::Duration;
use tokio::time::Instant;

/// Caller-supplied hook run once per poll iteration.
///
/// The hook runs while no command is outstanding, so it may not block the
/// device; it should do short, bounded work (feed a watchdog, blink an LED).
pub type WaitHook<'a> = &'a mut (dyn FnMut() + Send);

/// Point in time after which a wait gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires: Option<Instant>,
}

impl Deadline {
    /// Deadline `timeout` from now; `Duration::ZERO` waits forever.
    pub fn after(timeout: Duration) -> Self {
        if timeout.is_zero() {
            Self::never()
        } else {
            Self {
                expires: Some(Instant::now() + timeout),
            }
        }
    }

    /// A deadline that never expires.
    pub fn never() -> Self {
        Self { expires: None }
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        match self.expires {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Time left, or `None` for an unbounded wait.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Length of the next poll step: `interval`, capped by the time left.
    pub fn step(&self, interval: Duration) -> Duration {
        match self.remaining() {
            Some(left) => left.min(interval),
            None => interval,
        }
    }
}

/// Invoke the hook if one was supplied.
pub(crate) fn run_hook(hook: &mut Option<WaitHook<'_>>) {
    if let Some(hook) = hook.as_mut() {
        hook();
    }
}

//! Driver timing and buffering configuration.
//!
//! The defaults match the module's documented response times at its
//! factory rate of 115200 baud and are fine for most setups. Tune them
//! with [`DriverConfig`] when the module sits behind a slower link or the
//! application emits many events.

use std::time::Duration;

// ==================== Defaults ====================

/// Time allowed for the module to finish a command with `OK`/`ERROR`.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Sleep between checks in join, transmit and receive waits.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Unsolicited lines buffered before the receiver starts dropping them.
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Longest line accepted from the module, in bytes.
pub const MAX_LINE_LEN: usize = 512;

/// Quiet time after a work-mode switch before the splash output is discarded.
pub const MODE_SETTLE_TIME: Duration = Duration::from_millis(500);

/// Upper bound for the reboot triggered by a work-mode switch.
pub const MODE_SWITCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Driver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Bounded wait for a single command/response cycle.
    pub command_timeout: Duration,
    /// Yield interval for polling waits.
    pub poll_interval: Duration,
    /// Capacity of the event channel.
    pub event_queue_depth: usize,
    /// Maximum accepted line length; longer lines are discarded.
    pub max_line_len: usize,
    /// Quiet period after a work-mode switch.
    pub mode_settle_time: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            command_timeout: COMMAND_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            event_queue_depth: EVENT_QUEUE_DEPTH,
            max_line_len: MAX_LINE_LEN,
            mode_settle_time: MODE_SETTLE_TIME,
        }
    }
}

impl DriverConfig {
    /// Override the command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Override the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

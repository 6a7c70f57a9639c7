//! Line framing and classification.
//!
//! The module terminates every output line with `\r\n` and separates the
//! value of a query from its status with a blank line. [`LineSplitter`]
//! turns the raw byte stream into owned [`Line`]s and [`Line::kind`] tells
//! the receiver where each one goes.

use log::warn;
use std::fmt;

/// Prefix of every unsolicited notification.
pub const EVENT_PREFIX: &str = "+EVT:";

/// One line of module output, without its terminator.
///
/// A `Line` is moved into exactly one consumer; it is deliberately not
/// `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct Line(String);

/// Routing class of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `OK`: the outstanding command succeeded.
    Ok,
    /// `ERROR` or an `AT_*` failure status such as `AT_BUSY_ERROR`.
    Failure,
    /// `+EVT:...` notification.
    Event,
    /// Anything else: a query value, echo or splash text.
    Value,
}

impl LineKind {
    /// Whether this line ends the outstanding command.
    pub fn is_terminal(self) -> bool {
        matches!(self, LineKind::Ok | LineKind::Failure)
    }
}

impl Line {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Classify the line for routing.
    pub fn kind(&self) -> LineKind {
        let text = self.0.as_str();
        if text.starts_with(EVENT_PREFIX) {
            LineKind::Event
        } else if text == "OK" {
            LineKind::Ok
        } else if is_failure_status(text) {
            LineKind::Failure
        } else {
            LineKind::Value
        }
    }

    /// Whether this is the join confirmation event.
    pub fn is_joined_event(&self) -> bool {
        self.0 == "+EVT:JOINED"
    }

    /// Whether this is a join failure event (either spelling).
    pub fn is_join_failed_event(&self) -> bool {
        self.0.starts_with("+EVT:JOIN FAILED") || self.0.starts_with("+EVT:JOIN_FAILED")
    }
}

/// Failure statuses that do not follow the `AT_<reason>_ERROR` pattern.
const OTHER_FAILURES: &[&str] = &[
    "AT_NO_NETWORK_JOINED",
    "AT_COMMAND_NOT_FOUND",
    "AT_MODE_NO_SUPPORT",
    "AT_NO_CLASSB_ENABLE",
    "AT_TEST_PARAM_OVERFLOW",
];

fn is_failure_status(text: &str) -> bool {
    text == "ERROR"
        || text == "AT_ERROR"
        || (text.starts_with("AT_") && text.ends_with("_ERROR"))
        || OTHER_FAILURES.contains(&text)
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accumulates transport bytes and yields complete lines.
#[derive(Debug)]
pub struct LineSplitter {
    buf: Vec<u8>,
    max_len: usize,
    overflowed: bool,
}

impl LineSplitter {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_len.min(128)),
            max_len,
            overflowed: false,
        }
    }

    /// Feed bytes and return every line completed by them.
    ///
    /// Empty lines are dropped. A line longer than the limit is discarded up
    /// to its terminator.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Line> {
        let mut lines = Vec::new();

        for &b in bytes {
            if b == b'\n' {
                if self.overflowed {
                    self.overflowed = false;
                    self.buf.clear();
                    continue;
                }
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
                if !self.buf.is_empty() {
                    let text = String::from_utf8_lossy(&self.buf).into_owned();
                    lines.push(Line(text));
                }
                self.buf.clear();
            } else if self.overflowed {
                continue;
            } else if self.buf.len() >= self.max_len {
                warn!("Discarding line longer than {} bytes", self.max_len);
                self.overflowed = true;
                self.buf.clear();
            } else {
                self.buf.push(b);
            }
        }

        lines
    }

    /// Bytes of the current partial line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

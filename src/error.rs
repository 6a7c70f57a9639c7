//! Driver error type.

use std::fmt;
use std::io;

/// Result alias used throughout the driver.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for module operations.
#[derive(Debug)]
pub enum Error {
    /// Argument out of range or otherwise unusable, rejected before any I/O.
    InvalidArgument(&'static str),
    /// Operation not valid for the current mode or join mode.
    InvalidState(&'static str),
    /// Transmit or receive attempted while not joined.
    NotConnected,
    /// Module replied `ERROR`, a status like `AT_BUSY_ERROR`, or a malformed line.
    InvalidResponse(String),
    /// Bounded wait exceeded.
    Timeout,
    /// Generic failure (e.g. sub-band requested for a band without sub-bands).
    Fail,
    /// Another command holds the device and the caller asked not to wait.
    Busy,
    /// Transport write failed.
    Io(io::Error),
    /// Line receiver has stopped (transport closed or device deinitialized).
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            Error::InvalidState(what) => write!(f, "invalid state: {}", what),
            Error::NotConnected => write!(f, "not joined to a network"),
            Error::InvalidResponse(status) => write!(f, "invalid response: {}", status),
            Error::Timeout => write!(f, "operation timed out"),
            Error::Fail => write!(f, "operation failed"),
            Error::Busy => write!(f, "device busy"),
            Error::Io(e) => write!(f, "transport error: {}", e),
            Error::Closed => write!(f, "line receiver closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Parse a captured reply value, mapping garbage to `InvalidResponse`.
pub(crate) fn parse_value<T: std::str::FromStr>(value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidResponse(value.to_string()))
}

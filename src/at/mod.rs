//! AT command transport.
//!
//! This module contains:
//! - [`line`]: line framing and classification
//! - [`receiver`]: background task routing lines to replies or events
//! - [`engine`]: single-flight command/response cycle

mod engine;
mod line;
pub(crate) mod receiver;

pub use engine::{CommandEngine, Reply};
pub use line::{Line, LineKind, LineSplitter, EVENT_PREFIX};

//! Event Module - run observability
//!
//! - `log`: EventLog, Event, EventKind

mod log;

pub use log::{Event, EventKind, EventLog};

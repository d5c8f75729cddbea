//! Utilities Module - shared infrastructure
//!
//! - `constants`: Centralized timeouts and limits
//! - `jsonpath`: Dotted-path access into JSON values (`result.items.0.name`)

pub mod constants;
pub mod jsonpath;

pub use constants::{
    CONNECT_TIMEOUT, DEFAULT_MAX_DEPTH, DEFAULT_MAX_TURNS, INFER_TIMEOUT, RUN_TIMEOUT, TOOL_TIMEOUT,
};

//! Validation Module - static checks before execution
//!
//! - `result`: ValidationIssue, ValidationReport
//! - `validator`: Validator

mod result;
mod validator;

pub use result::{EffectiveDefault, Severity, ValidationIssue, ValidationReport};
pub use validator::Validator;

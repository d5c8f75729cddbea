//! Binding Module - variables into prompts
//!
//! - `template`: body templates (`{{var}}`, `{{#if}}`, `{{#each}}`)
//! - `params`: parameter precedence, coercion and constraints
//!
//! Data flow:
//! ```text
//! caller input + input.schema defaults + input.default
//!                  ↓ resolve_parameters
//!            variable set (FxHashMap)
//!                  ↓ Template::render
//!              prompt text
//! ```

mod params;
mod template;

pub use params::{
    check_constraints, coerce_value, default_warnings, effective_default, resolve_parameters,
    ParamSource, Resolution, ResolvedParameter,
};
pub use template::{
    is_truthy, missing_variables, render_str, value_to_string, SyntaxError, Template, VarRef,
};

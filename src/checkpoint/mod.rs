//! Checkpoint Module - persistence and resume
//!
//! - `state`: [`ResumeState`], the projection of an execution context
//! - `store`: [`CheckpointStore`], atomic writes, backups, retention
//! - `compat`: [`validate_compatibility`], drift scoring before a resume

mod compat;
mod state;
mod store;

pub use compat::{document_tools, validate_compatibility, CompatibilityReport};
pub use state::{ContextEvolution, ResumeState, STATE_VERSION};
pub use store::{sanitize_id, validate_id, CheckpointStore, CheckpointSummary, SaveReceipt};

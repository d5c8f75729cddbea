//! DAG Module - sub-workflow dependency ordering
//!
//! - `graph`: DependencyGraph built from `depends_on` declarations
//!
//! Cycles are rejected at validation time; the runtime scheduler only ever
//! sees acyclic graphs.

mod graph;

pub use graph::DependencyGraph;

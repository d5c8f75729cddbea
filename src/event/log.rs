//! EventLog - append-only record of everything a run did
//!
//! - Event: envelope with id + timestamp + kind
//! - EventKind: run / engine / tool / sub-workflow / checkpoint levels
//! - EventLog: thread-safe, shared by a run and all of its sub-workflows

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        workflow_id: Arc<str>,
        name: String,
        content_hash: String,
        resumed: bool,
    },
    RunCompleted {
        workflow_id: Arc<str>,
        turns: u32,
        duration_ms: u64,
    },
    RunFailed {
        workflow_id: Arc<str>,
        error: String,
    },
    RunCancelled {
        workflow_id: Arc<str>,
    },

    // ═══════════════════════════════════════════
    // ENGINE LEVEL
    // ═══════════════════════════════════════════
    ModelCalled {
        workflow_id: Arc<str>,
        turn: u32,
        attempt: u32,
        messages: usize,
    },
    ModelResponded {
        workflow_id: Arc<str>,
        turn: u32,
        tool_calls: usize,
        input_tokens: u32,
        output_tokens: u32,
    },

    // ═══════════════════════════════════════════
    // TOOL LEVEL
    // ═══════════════════════════════════════════
    ToolInvoked {
        workflow_id: Arc<str>,
        tool: String,
        call_id: String,
        arguments: Value,
    },
    ToolCompleted {
        workflow_id: Arc<str>,
        tool: String,
        call_id: String,
        duration_ms: u64,
    },
    ToolFailed {
        workflow_id: Arc<str>,
        tool: String,
        call_id: String,
        error: String,
    },
    VariableChanged {
        workflow_id: Arc<str>,
        key: String,
        source: String,
    },

    // ═══════════════════════════════════════════
    // COMPOSITION LEVEL
    // ═══════════════════════════════════════════
    SubWorkflowStarted {
        workflow_id: Arc<str>,
        child_id: String,
        name: String,
        mode: String,
    },
    SubWorkflowFinished {
        workflow_id: Arc<str>,
        child_id: String,
        name: String,
        status: String,
    },

    // ═══════════════════════════════════════════
    // CHECKPOINT LEVEL
    // ═══════════════════════════════════════════
    CheckpointSaved {
        workflow_id: Arc<str>,
        step: u64,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backup: Option<String>,
    },
    CheckpointArchived {
        workflow_id: Arc<str>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

impl EventKind {
    pub fn workflow_id(&self) -> &str {
        match self {
            Self::RunStarted { workflow_id, .. }
            | Self::RunCompleted { workflow_id, .. }
            | Self::RunFailed { workflow_id, .. }
            | Self::RunCancelled { workflow_id }
            | Self::ModelCalled { workflow_id, .. }
            | Self::ModelResponded { workflow_id, .. }
            | Self::ToolInvoked { workflow_id, .. }
            | Self::ToolCompleted { workflow_id, .. }
            | Self::ToolFailed { workflow_id, .. }
            | Self::VariableChanged { workflow_id, .. }
            | Self::SubWorkflowStarted { workflow_id, .. }
            | Self::SubWorkflowFinished { workflow_id, .. }
            | Self::CheckpointSaved { workflow_id, .. }
            | Self::CheckpointArchived { workflow_id, .. } => workflow_id,
        }
    }

    /// Terminal run events
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted { .. } | Self::RunFailed { .. } | Self::RunCancelled { .. }
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    /// All events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Zero-copy access to events via callback; keep it short
    pub fn with_events<T>(&self, f: impl FnOnce(&[Event]) -> T) -> T {
        f(&self.events.read())
    }

    /// Events of one workflow id (children excluded)
    pub fn filter_workflow(&self, workflow_id: &str) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.workflow_id() == workflow_id)
                .cloned()
                .collect()
        })
    }

    /// Count events matching a predicate
    pub fn count(&self, predicate: impl Fn(&EventKind) -> bool) -> usize {
        self.with_events(|events| events.iter().filter(|e| predicate(&e.kind)).count())
    }

    /// Checkpoint writes for one workflow id
    pub fn checkpoint_writes(&self, workflow_id: &str) -> usize {
        self.count(|k| {
            matches!(k, EventKind::CheckpointSaved { .. }) && k.workflow_id() == workflow_id
        })
    }

    pub fn to_json(&self) -> Value {
        self.with_events(|events| serde_json::to_value(events).unwrap_or(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}

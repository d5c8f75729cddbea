//! Checkpoint persistence tests
//!
//! Store-level behavior with states produced by real runs.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rustc_hash::FxHashMap;
use serde_json::json;

use common::{workflow, Workspace};
use lumen::ast::parse_document;
use lumen::checkpoint::{validate_compatibility, CheckpointStore, ResumeState, STATE_VERSION};
use lumen::provider::{MockProvider, ToolCall};
use lumen::runtime::{ExecutionContext, RunStatus};

/// Run a workflow that sets a variable, records an insight and requests a
/// checkpoint; the archived file holds the last state written
async fn checkpointed_run(ws: &Workspace, id: &str) -> ResumeState {
    let doc = parse_document(&workflow("notes", "", "Take notes"), None).unwrap();
    let mock = MockProvider::new()
        .then_tool_calls(vec![
            ("set_variable", json!({"name": "topic", "value": {"lang": "rust"}, "reasoning": "asked"})),
            ("record_insight", json!({"insight": "borrowck is strict"})),
        ])
        .then_tool_calls(vec![("request_checkpoint", json!({}))])
        .then_text("done");
    let orchestrator = ws.orchestrator(Arc::new(mock));
    let outcome = orchestrator
        .run_with_id(id, &doc, &FxHashMap::default())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(orchestrator.events().checkpoint_writes(id), 3);

    let archive = ws.store.archive_path_for(id).unwrap();
    serde_json::from_str(&std::fs::read_to_string(archive).unwrap()).unwrap()
}

#[tokio::test]
async fn test_round_trip_reconstructs_context() {
    let ws = Workspace::new();
    let state = checkpointed_run(&ws, "notes-1").await;

    assert_eq!(state.version, STATE_VERSION);
    assert_eq!(state.evolution.variables.get("topic"), Some(&json!({"lang": "rust"})));
    assert_eq!(state.evolution.insights, vec!["borrowck is strict".to_string()]);
    assert_eq!(state.evolution.changes[0].reasoning.as_deref(), Some("asked"));
    assert!(state.available_tools.contains(&"set_variable".to_string()));

    let ctx = state.restore();
    assert_eq!(ctx.variables.get("topic"), state.evolution.variables.get("topic"));
    assert_eq!(ctx.completed_tools, state.completed_tools);
    assert_eq!(ctx.interactions.entries(), &state.interactions[..]);
    assert_eq!(ctx.interactions.session_start(), state.interactions.len());
}

#[tokio::test]
async fn test_restore_then_checkpoint_is_identical() {
    let ws = Workspace::new();
    let state = checkpointed_run(&ws, "notes-1").await;

    let again = ResumeState::from_context(&state.restore());
    assert_eq!(again, state);

    // And byte-identical once written back
    let before = std::fs::read(ws.store.archive_path_for("notes-1").unwrap()).unwrap();
    ws.store.save(&again, None).await.unwrap();
    let after = std::fs::read(ws.store.path_for("notes-1").unwrap()).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_concurrent_saves_of_one_id() {
    let ws = Workspace::new();
    let store = ws.store.clone().with_backup(true);
    let doc = parse_document(&workflow("busy", "", "Go"), None).unwrap();

    let mut handles = Vec::new();
    for step in 0..8u64 {
        let store: CheckpointStore = store.clone();
        let mut ctx = ExecutionContext::new("busy-1", &doc);
        ctx.step = step;
        handles.push(tokio::spawn(async move {
            store.save(&ResumeState::from_context(&ctx), None).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let state = store.load("busy-1").await.unwrap().unwrap();
    assert!(state.step < 8);
    assert_eq!(store.list_backups("busy-1").await.unwrap().len(), 7);
    let leftovers = std::fs::read_dir(store.dir())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_list_reports_status_and_archives() {
    let ws = Workspace::new();
    let doc = parse_document(&workflow("lister", "", "Go"), None).unwrap();

    let mut live = ExecutionContext::new("lister-1", &doc);
    live.begin();
    ws.store.save(&ResumeState::from_context(&live), None).await.unwrap();

    let done = ExecutionContext::new("lister-2", &doc);
    ws.store.save(&ResumeState::from_context(&done), None).await.unwrap();
    ws.store
        .complete("lister-2", lumen::config::OnComplete::Archive)
        .await
        .unwrap();

    let summaries = ws.store.list().await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].workflow_id, "lister-1");
    assert_eq!(summaries[0].status, Some(RunStatus::InProgress));
    assert!(!summaries[0].archived);
    assert_eq!(summaries[1].workflow_id, "lister-2");
    assert!(summaries[1].archived);
    assert_eq!(summaries[1].workflow_name.as_deref(), Some("lister"));

    // Fresh files survive any positive retention
    assert!(ws.store.sweep(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ids_cannot_escape_the_directory() {
    let ws = Workspace::new();
    for id in ["../etc/passwd", "a/b", "", ".hidden"] {
        let err = ws.store.path_for(id).unwrap_err();
        assert_eq!(err.code(), "LUMEN-053", "{id}");
    }
}

#[test]
fn test_compatibility_of_unchanged_document() {
    let doc = parse_document(&workflow("same", "tools: [search]\n", "Search"), None).unwrap();
    let mut ctx = ExecutionContext::new("same-1", &doc);
    let call = ToolCall {
        id: "call_1".into(),
        name: "search".into(),
        arguments: json!({}),
    };
    ctx.record_assistant(None, vec![call.clone()]);
    ctx.record_tool(&call, Ok(json!("hit")));

    let report = validate_compatibility(&ResumeState::from_context(&ctx), &doc);
    assert!(report.can_resume);
    assert_eq!(report.score, 1.0);
    assert!(report.warnings.is_empty());
}

//! Sub-workflow composition tests
//!
//! Inheritance modes, scheduling of start-time sub-workflows, on-demand
//! invocation by the engine, and the recursion/depth guards.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rustc_hash::FxHashMap;
use serde_json::json;

use common::{workflow, Workspace};
use lumen::ast::load_document;
use lumen::event::EventKind;
use lumen::provider::MockProvider;
use lumen::runtime::{Orchestrator, RunControl, RunSettings, RunStatus};

fn parent(mode: &str) -> String {
    workflow(
        "parent",
        &format!(
            "input:\n  schema:\n    secret: {{ type: string, default: hunter2 }}\nlumen:\n  workflows:\n    - name: child\n      path: ./child.lumen.md\n      mode: {}\n",
            mode
        ),
        "Parent body",
    )
}

// ============================================================================
// Inheritance modes
// ============================================================================

#[tokio::test]
async fn test_isolated_child_cannot_see_parent_variables() {
    let ws = Workspace::new();
    let path = ws.write("parent.lumen.md", &parent("isolated"));
    ws.write("child.lumen.md", &workflow("child", "", "CHILD-SEES {{secret}}"));
    let doc = load_document(&path).await.unwrap();

    let mock = Arc::new(MockProvider::new().then_text("parent done"));
    let outcome = Orchestrator::new(mock.clone())
        .run_with_id("iso-1", &doc, &FxHashMap::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    let child = outcome.variable("child").unwrap();
    assert_eq!(child["status"], json!("failed"));
    assert!(child["error"].as_str().unwrap().contains("secret"));
    assert!(!mock.requests().iter().any(|r| r.transcript().contains("hunter2")));
}

#[tokio::test]
async fn test_inherit_child_sees_parent_variables() {
    let ws = Workspace::new();
    let path = ws.write("parent.lumen.md", &parent("inherit"));
    ws.write("child.lumen.md", &workflow("child", "", "CHILD-SEES {{secret}}"));
    let doc = load_document(&path).await.unwrap();

    let mock = Arc::new(
        MockProvider::new()
            .route_text("CHILD-SEES", "child saw it")
            .then_text("parent done"),
    );
    let outcome = Orchestrator::new(mock.clone())
        .run_with_id("inh-1", &doc, &FxHashMap::default())
        .await
        .unwrap();

    let child = outcome.variable("child").unwrap();
    assert_eq!(child["status"], json!("completed"));
    assert_eq!(child["output"], json!("child saw it"));
    assert!(mock.requests()[0].transcript().contains("CHILD-SEES hunter2"));
}

fn calc_parent(mode: &str) -> String {
    workflow(
        "calc-parent",
        &format!(
            "lumen:\n  workflows:\n    - name: calc\n      path: ./calc.lumen.md\n      mode: {}\n",
            mode
        ),
        "Parent body",
    )
}

fn calc_mock() -> MockProvider {
    MockProvider::new()
        .route_tool_calls("CHILD-CALC", vec![("set_variable", json!({"name": "y", "value": 42}))])
        .route_text("CHILD-CALC", "y is set")
        .then_text("parent done")
}

#[tokio::test]
async fn test_merge_writes_child_changes_back() {
    let ws = Workspace::new();
    let path = ws.write("parent.lumen.md", &calc_parent("merge"));
    ws.write("calc.lumen.md", &workflow("calc", "", "CHILD-CALC compute y"));
    let doc = load_document(&path).await.unwrap();

    let orchestrator = ws.orchestrator(Arc::new(calc_mock()));
    let outcome = orchestrator
        .run_with_id("merge-1", &doc, &FxHashMap::default())
        .await
        .unwrap();

    assert_eq!(outcome.variable("y"), Some(&json!(42)));
    assert_eq!(outcome.variable("calc").unwrap()["variables"], json!({"y": 42}));
    let change = outcome
        .context
        .changes
        .iter()
        .find(|c| c.key == "y")
        .unwrap();
    assert_eq!(change.source, "sub_workflow:calc");

    // The child checkpoints under its own id
    assert_eq!(orchestrator.events().checkpoint_writes("merge-1.calc"), 1);
    assert!(ws.store.archive_path_for("merge-1.calc").unwrap().exists());
}

#[tokio::test]
async fn test_isolated_child_changes_stay_in_the_result() {
    let ws = Workspace::new();
    let path = ws.write("parent.lumen.md", &calc_parent("isolated"));
    ws.write("calc.lumen.md", &workflow("calc", "", "CHILD-CALC compute y"));
    let doc = load_document(&path).await.unwrap();

    let outcome = Orchestrator::new(Arc::new(calc_mock()))
        .run_with_id("iso-2", &doc, &FxHashMap::default())
        .await
        .unwrap();

    assert_eq!(outcome.variable("y"), None);
    assert_eq!(outcome.variable("calc").unwrap()["variables"]["y"], json!(42));
}

#[tokio::test]
async fn test_failed_child_binds_a_null_output() {
    let ws = Workspace::new();
    let header = "lumen:\n  workflows:\n    - name: child\n      path: ./missing.lumen.md\n";
    let path = ws.write("parent.lumen.md", &workflow("parent", header, "Use [{{child.output}}]"));
    let doc = load_document(&path).await.unwrap();

    let mock = Arc::new(MockProvider::new().then_text("carried on"));
    let outcome = Orchestrator::new(mock.clone())
        .run_with_id("fail-1", &doc, &FxHashMap::default())
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    let child = outcome.variable("child").unwrap();
    assert_eq!(child["status"], json!("failed"));
    assert_eq!(child["output"], json!(null));
    assert_eq!(child["variables"], json!({}));
    assert!(child["error"].as_str().unwrap().contains("LUMEN-002"));
    assert!(mock.requests()[0].transcript().contains("Use []"));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_during_prelude_resumes_the_child() {
    let ws = Workspace::new();
    let header = "lumen:\n  workflows:\n    - name: child\n      path: ./child.lumen.md\n";
    let path = ws.write("parent.lumen.md", &workflow("parent", header, "Use {{child.output}}"));
    ws.write("child.lumen.md", &workflow("child", "", "CHILD-SLOW gather"));
    let doc = load_document(&path).await.unwrap();

    let control = RunControl::new();
    let slow = MockProvider::new()
        .with_delay(Duration::from_secs(30))
        .then_text("never");
    let orchestrator = ws.orchestrator(Arc::new(slow)).with_control(control.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        control.cancel();
    });

    let outcome = orchestrator
        .run_with_id("pre-1", &doc, &FxHashMap::default())
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.variable("child"), None);
    assert!(outcome.context.interactions.is_empty());

    let child_state = ws.store.load("pre-1.child").await.unwrap().unwrap();
    assert_eq!(child_state.status, RunStatus::Cancelled);
    let parent_state = ws.store.load("pre-1").await.unwrap().unwrap();
    assert_eq!(parent_state.status, RunStatus::Cancelled);

    let mock = Arc::new(
        MockProvider::new()
            .route_text("CHILD-SLOW", "gathered")
            .then_text("parent done"),
    );
    let resumed = ws.orchestrator(mock.clone()).resume("pre-1", &doc, false).await.unwrap();

    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.variable("child").unwrap()["output"], json!("gathered"));
    assert_eq!(mock.call_count(), 2);
    // The child continued its own checkpoint instead of starting over
    let child_request = &mock.requests()[0];
    assert_eq!(child_request.messages.len(), 1);
    assert!(mock.requests()[1].transcript().contains("Use gathered"));
    assert!(ws.store.archive_path_for("pre-1.child").unwrap().exists());
}

// ============================================================================
// Scheduling
// ============================================================================

#[tokio::test]
async fn test_parallel_group_then_dependent() {
    let ws = Workspace::new();
    let header = "lumen:\n  workflows:\n    - { name: a, path: ./a.lumen.md, parallel_group: checks }\n    - { name: b, path: ./b.lumen.md, parallel_group: checks }\n    - { name: c, path: ./c.lumen.md, depends_on: [a, b] }\n";
    let path = ws.write(
        "parent.lumen.md",
        &workflow("fan", header, "Summarize {{a.output}} and {{b.output}}"),
    );
    ws.write("a.lumen.md", &workflow("a", "", "CHILD-A lint"));
    ws.write("b.lumen.md", &workflow("b", "", "CHILD-B test"));
    ws.write("c.lumen.md", &workflow("c", "", "CHILD-C report"));
    let doc = load_document(&path).await.unwrap();

    let mock = Arc::new(
        MockProvider::new()
            .route_text("CHILD-A", "lint clean")
            .route_text("CHILD-B", "tests green")
            .route_text("CHILD-C", "report written")
            .then_text("all good"),
    );
    let orchestrator = Orchestrator::new(mock.clone());
    let outcome = orchestrator
        .run_with_id("fan-1", &doc, &FxHashMap::default())
        .await
        .unwrap();

    for name in ["a", "b", "c"] {
        assert_eq!(outcome.variable(name).unwrap()["status"], json!("completed"), "{name}");
    }
    let parent_request = mock
        .requests()
        .into_iter()
        .find(|r| r.transcript().contains("Summarize"))
        .unwrap();
    assert!(parent_request.transcript().contains("Summarize lint clean and tests green"));

    let events = orchestrator.events().events();
    let position = |want: &str, finished: bool| {
        events
            .iter()
            .position(|e| match &e.kind {
                EventKind::SubWorkflowFinished { name, .. } if finished => name == want,
                EventKind::SubWorkflowStarted { name, .. } if !finished => name == want,
                _ => false,
            })
            .unwrap()
    };
    assert!(position("a", true) < position("c", false));
    assert!(position("b", true) < position("c", false));
}

// ============================================================================
// On-demand invocation
// ============================================================================

#[tokio::test]
async fn test_engine_calls_sub_workflow_as_tool() {
    let ws = Workspace::new();
    let header = "lumen:\n  workflows:\n    - name: lookup\n      path: ./lookup.lumen.md\n      when: on_demand\n";
    let path = ws.write("parent.lumen.md", &workflow("asker", header, "Ask around"));
    ws.write(
        "lookup.lumen.md",
        &workflow("lookup", "input:\n  schema:\n    topic: string\n", "CHILD-LOOKUP {{topic}}"),
    );
    let doc = load_document(&path).await.unwrap();

    let mock = Arc::new(
        MockProvider::new()
            .route_text("CHILD-LOOKUP", "found it")
            .then_tool_calls(vec![("lookup", json!({"topic": "rust"}))])
            .then_text("done"),
    );
    let outcome = Orchestrator::new(mock.clone())
        .run_with_id("ask-1", &doc, &FxHashMap::default())
        .await
        .unwrap();

    // Not run as a prelude: the first engine call is the parent's
    assert!(mock.requests()[0].transcript().contains("Ask around"));
    assert!(mock.requests()[0].tools.iter().any(|t| t.name == "lookup"));

    let tool = &outcome.context.completed_tools[0];
    assert!(tool.success);
    assert_eq!(tool.name, "lookup");
    assert_eq!(outcome.variable("lookup").unwrap()["output"], json!("found it"));
    assert!(mock
        .requests()
        .iter()
        .any(|r| r.transcript().contains("CHILD-LOOKUP rust")));
}

// ============================================================================
// Guards
// ============================================================================

#[tokio::test]
async fn test_self_invocation_is_fatal() {
    let ws = Workspace::new();
    let header = "lumen:\n  workflows:\n    - name: again\n      path: ./loop.lumen.md\n";
    let path = ws.write("loop.lumen.md", &workflow("loop", header, "Loop"));
    let doc = load_document(&path).await.unwrap();

    let err = Orchestrator::new(Arc::new(MockProvider::new()))
        .run_with_id("loop-1", &doc, &FxHashMap::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "LUMEN-041");
    assert!(err.to_string().contains("loop.lumen.md"));
}

#[tokio::test]
async fn test_depth_limit_fails_the_deep_child() {
    let ws = Workspace::new();
    let to = |target: &str| format!("lumen:\n  workflows:\n    - name: next\n      path: ./{}.lumen.md\n", target);
    let path = ws.write("top.lumen.md", &workflow("top", &to("middle"), "Top"));
    ws.write("middle.lumen.md", &workflow("middle", &to("bottom"), "Middle"));
    ws.write("bottom.lumen.md", &workflow("bottom", "", "Bottom"));
    let doc = load_document(&path).await.unwrap();

    let settings = RunSettings {
        max_depth: 1,
        ..Default::default()
    };
    let outcome = Orchestrator::new(Arc::new(MockProvider::new()))
        .with_settings(settings)
        .run_with_id("deep-1", &doc, &FxHashMap::default())
        .await
        .unwrap();

    let middle = outcome.variable("next").unwrap();
    assert_eq!(middle["status"], json!("failed"));
    assert!(middle["error"].as_str().unwrap().contains("nesting depth"));
}

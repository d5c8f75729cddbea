//! Document loading and validation tests

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rustc_hash::FxHashMap;
use serde_json::json;

use common::Workspace;
use lumen::ast::{load_document, InheritanceMode, InvocationTiming};
use lumen::provider::MockProvider;
use lumen::runtime::Orchestrator;
use lumen::validation::{ValidationIssue, Validator};

const REVIEW: &str = r#"---
name: review-pr
description: Review a pull request
model: claude-sonnet-4-5
config:
  temperature: 0.2
  max_output_tokens: 2048
  stop_sequences: ["</done>"]
tools: [read_file, run_tests]
input:
  schema:
    repo: { type: string, description: Repo path, default: "." }
    mode: { type: string, enum: [quick, deep] }
    ticket: { type: string, pattern: "^[A-Z]+-[0-9]+$" }
  default:
    mode: quick
output:
  format: json
  schema: { type: object }
lumen:
  workflows:
    - name: lint
      path: ./lint.lumen.md
      mode: isolated
      params: { target: "{{repo}}" }
      parallel_group: checks
  checkpoint: { trigger: every_tool_call, backup: true }
  retry: { max_attempts: 3, backoff_ms: 200 }
x-team-owner: platform
---
Review {{repo}} in {{mode}} mode.

```workflow
name: summary
path: ./summary.lumen.md
mode: merge
depends_on: [lint]
when: on_demand
```
"#;

#[tokio::test]
async fn test_load_full_document() {
    let ws = Workspace::new();
    let path = ws.write("review.lumen.md", REVIEW);
    let doc = load_document(&path).await.unwrap();

    assert_eq!(doc.name, "review-pr");
    assert_eq!(doc.model, "claude-sonnet-4-5");
    assert_eq!(doc.config.max_output_tokens, Some(2048));
    assert_eq!(doc.tools, vec!["read_file", "run_tests"]);
    assert_eq!(doc.input.schema.len(), 3);
    assert_eq!(doc.input.default.get("mode"), Some(&json!("quick")));
    assert_eq!(doc.extension.checkpoint.backup, Some(true));
    assert_eq!(doc.extension.retry.backoff_ms, 200);
    assert!(doc.extra.contains_key("x-team-owner"));
    assert_eq!(doc.source_path.as_deref(), Some(path.as_path()));
    assert!(doc.content_hash.starts_with("xxh3:"));

    let names: Vec<&str> = doc.invocations.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["lint", "summary"]);
    let summary = doc.invocation("summary").unwrap();
    assert_eq!(summary.mode, InheritanceMode::Merge);
    assert_eq!(summary.when, InvocationTiming::OnDemand);
    assert_eq!(summary.depends_on, vec!["lint"]);

    // Declaration blocks never reach the engine
    assert!(!doc.body.contains("```workflow"));
    assert!(doc.body.contains("Review {{repo}}"));
}

#[tokio::test]
async fn test_full_document_validates_with_tool_warnings() {
    let ws = Workspace::new();
    let doc = load_document(&ws.write("review.lumen.md", REVIEW)).await.unwrap();

    let report = Validator::new().validate(&doc);
    assert!(report.is_valid(), "{:?}", report.errors);
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, ValidationIssue::UnknownTool { name } if name == "read_file")));

    let report = Validator::new()
        .with_known_tools(["read_file", "run_tests"])
        .validate(&doc);
    assert!(!report
        .warnings
        .iter()
        .any(|w| matches!(w, ValidationIssue::UnknownTool { .. })));
}

#[tokio::test]
async fn test_headerless_file_takes_its_name_from_the_stem() {
    let ws = Workspace::new();
    let path = ws.write("notes.lumen.md", "Just do {{thing}}\n");
    let doc = load_document(&path).await.unwrap();

    assert!(!doc.has_header);
    assert_eq!(doc.name, "notes");
    assert!(doc.model.is_empty());
    assert!(Validator::new().validate(&doc).is_valid());
}

#[tokio::test]
async fn test_missing_file() {
    let ws = Workspace::new();
    let err = load_document(&ws.path().join("absent.lumen.md")).await.unwrap_err();
    assert_eq!(err.code(), "LUMEN-002");
}

#[tokio::test]
async fn test_dependency_cycle_fails_before_any_invocation() {
    let ws = Workspace::new();
    let text = "---\nname: cyclic\nmodel: m\nlumen:\n  workflows:\n    - { name: a, path: ./a.lumen.md, depends_on: [b] }\n    - { name: b, path: ./b.lumen.md, depends_on: [a] }\n---\nGo\n";
    let doc = load_document(&ws.write("cyclic.lumen.md", text)).await.unwrap();

    let report = Validator::new().validate(&doc);
    assert!(report
        .errors
        .iter()
        .any(|e| matches!(e, ValidationIssue::DependencyCycle { .. })));

    let mock = Arc::new(MockProvider::new());
    let orchestrator = Orchestrator::new(mock.clone());
    let err = orchestrator
        .run_with_id("cyclic-1", &doc, &FxHashMap::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "LUMEN-010");
    assert_eq!(mock.call_count(), 0);
    assert!(orchestrator.events().is_empty());
}

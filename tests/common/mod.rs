//! Test fixtures and helpers

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lumen::checkpoint::CheckpointStore;
use lumen::provider::MockProvider;
use lumen::runtime::Orchestrator;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tempfile::TempDir;

/// Write a workflow file into `dir` and return its path
pub fn write_workflow(dir: &Path, file: &str, text: &str) -> PathBuf {
    let path = dir.join(file);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, text).unwrap();
    path
}

/// Header + body with the given extra header lines
pub fn workflow(name: &str, header: &str, body: &str) -> String {
    format!("---\nname: {}\nmodel: mock-v1\n{}---\n{}\n", name, header, body)
}

pub fn inputs(pairs: &[(&str, Value)]) -> FxHashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Temp workspace with a checkpoint store under `<tmp>/checkpoints`
pub struct Workspace {
    pub dir: TempDir,
    pub store: CheckpointStore,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoints"));
        Self { dir, store }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, file: &str, text: &str) -> PathBuf {
        write_workflow(self.dir.path(), file, text)
    }

    pub fn orchestrator(&self, mock: Arc<MockProvider>) -> Orchestrator {
        Orchestrator::new(mock).with_store(self.store.clone())
    }
}

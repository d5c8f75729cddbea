//! CheckpointStore - atomic, per-id serialized persistence of ResumeStates
//!
//! Layout under the checkpoint directory:
//!
//! ```text
//! <id>.checkpoint.json                 live checkpoint
//! <id>.<timestamp>.bak.json            previous versions (when backups are on)
//! <id>.completed.json                  archived after a completed run
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;

use crate::config::{LumenConfig, OnComplete};
use crate::error::{LumenError, Result};
use crate::runtime::RunStatus;

use super::state::{ResumeState, STATE_VERSION};

const LIVE_SUFFIX: &str = ".checkpoint.json";
const ARCHIVE_SUFFIX: &str = ".completed.json";
const BACKUP_SUFFIX: &str = ".bak.json";

/// Where a save landed
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReceipt {
    pub path: PathBuf,
    pub backup: Option<PathBuf>,
}

/// One row of `list()`
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    pub workflow_id: String,
    pub path: PathBuf,
    pub archived: bool,
    /// `None` when the file cannot be read as a ResumeState
    pub status: Option<RunStatus>,
    pub workflow_name: Option<String>,
    pub step: Option<u64>,
    pub modified: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    backup: bool,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("dir", &self.dir)
            .field("backup", &self.backup)
            .finish()
    }
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            backup: false,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Keep the previous file as a timestamped backup on every save
    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn from_config(config: &LumenConfig) -> Self {
        Self::new(config.checkpoint_dir()).with_backup(config.checkpoint.backup)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn backups_enabled(&self) -> bool {
        self.backup
    }

    pub fn path_for(&self, workflow_id: &str) -> Result<PathBuf> {
        validate_id(workflow_id)?;
        Ok(self.dir.join(format!("{}{}", workflow_id, LIVE_SUFFIX)))
    }

    pub fn archive_path_for(&self, workflow_id: &str) -> Result<PathBuf> {
        validate_id(workflow_id)?;
        Ok(self.dir.join(format!("{}{}", workflow_id, ARCHIVE_SUFFIX)))
    }

    fn lock_for(&self, workflow_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(workflow_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Write `state` atomically (temp file + rename)
    ///
    /// `backup` overrides the store-wide setting for this write.
    pub async fn save(&self, state: &ResumeState, backup: Option<bool>) -> Result<SaveReceipt> {
        let path = self.path_for(&state.workflow_id)?;
        let lock = self.lock_for(&state.workflow_id);
        let _guard = lock.lock().await;

        fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(state)?;

        let temp_path = self.dir.join(format!(
            ".{}.{}.tmp",
            state.workflow_id,
            uuid::Uuid::new_v4().simple()
        ));
        if let Err(e) = fs::write(&temp_path, &json).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        let mut backup_path = None;
        if backup.unwrap_or(self.backup) && fs::try_exists(&path).await.unwrap_or(false) {
            let target = self.dir.join(format!(
                "{}.{}{}",
                state.workflow_id,
                Utc::now().format("%Y%m%dT%H%M%S%9fZ"),
                BACKUP_SUFFIX
            ));
            if let Err(e) = fs::copy(&path, &target).await {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e.into());
            }
            backup_path = Some(target);
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::debug!(
            workflow_id = %state.workflow_id,
            step = state.step,
            path = %path.display(),
            "checkpoint saved"
        );

        Ok(SaveReceipt {
            path,
            backup: backup_path,
        })
    }

    /// Load the live checkpoint; `Ok(None)` when there is none
    ///
    /// Unreadable JSON or an unknown version is [`LumenError::CheckpointCorrupted`];
    /// the file is left in place.
    pub async fn load(&self, workflow_id: &str) -> Result<Option<ResumeState>> {
        let path = self.path_for(workflow_id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let corrupted = |reason: String| LumenError::CheckpointCorrupted {
            workflow: workflow_id.to_string(),
            path: path.display().to_string(),
            reason,
        };

        let raw: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| corrupted(e.to_string()))?;
        match raw.get("version").and_then(|v| v.as_u64()) {
            Some(v) if v == u64::from(STATE_VERSION) => {}
            Some(v) => return Err(corrupted(format!("unsupported version {}", v))),
            None => return Err(corrupted("missing version".to_string())),
        }

        serde_json::from_value(raw)
            .map(Some)
            .map_err(|e| corrupted(e.to_string()))
    }

    /// Move an unreadable checkpoint aside so a fresh run can take its id
    pub async fn quarantine(&self, workflow_id: &str) -> Result<Option<PathBuf>> {
        let path = self.path_for(workflow_id)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let target = self.dir.join(format!(
            "{}.{}.corrupt.json",
            workflow_id,
            Utc::now().format("%Y%m%dT%H%M%S%9fZ")
        ));
        fs::rename(&path, &target).await?;
        tracing::warn!(workflow_id, path = %target.display(), "corrupted checkpoint moved aside");
        Ok(Some(target))
    }

    /// Archive or delete the live checkpoint of a completed run
    ///
    /// Returns the archive path for [`OnComplete::Archive`]; `Ok(None)` when
    /// there was nothing to do or the file was deleted.
    pub async fn complete(&self, workflow_id: &str, action: OnComplete) -> Result<Option<PathBuf>> {
        let path = self.path_for(workflow_id)?;
        let lock = self.lock_for(workflow_id);
        let _guard = lock.lock().await;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        match action {
            OnComplete::Archive => {
                let target = self.archive_path_for(workflow_id)?;
                fs::rename(&path, &target).await?;
                Ok(Some(target))
            }
            OnComplete::Delete => {
                fs::remove_file(&path).await?;
                Ok(None)
            }
        }
    }

    pub async fn delete(&self, workflow_id: &str) -> Result<bool> {
        let path = self.path_for(workflow_id)?;
        let lock = self.lock_for(workflow_id);
        let _guard = lock.lock().await;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Live and archived checkpoints, sorted by id
    pub async fn list(&self) -> Result<Vec<CheckpointSummary>> {
        let mut out = Vec::new();
        for (path, name, modified) in self.entries().await? {
            let (id, archived) = if let Some(id) = name.strip_suffix(LIVE_SUFFIX) {
                (id, false)
            } else if let Some(id) = name.strip_suffix(ARCHIVE_SUFFIX) {
                (id, true)
            } else {
                continue;
            };

            let state = fs::read(&path)
                .await
                .ok()
                .and_then(|bytes| serde_json::from_slice::<ResumeState>(&bytes).ok());

            out.push(CheckpointSummary {
                workflow_id: id.to_string(),
                path,
                archived,
                status: state.as_ref().map(|s| s.status),
                workflow_name: state.as_ref().map(|s| s.workflow_name.clone()),
                step: state.as_ref().map(|s| s.step),
                modified: modified.into(),
            });
        }
        out.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id).then(a.archived.cmp(&b.archived)));
        Ok(out)
    }

    /// Backups of one id, oldest first
    pub async fn list_backups(&self, workflow_id: &str) -> Result<Vec<PathBuf>> {
        validate_id(workflow_id)?;
        let prefix = format!("{}.", workflow_id);
        let mut backups: Vec<PathBuf> = self
            .entries()
            .await?
            .into_iter()
            .filter(|(_, name, _)| {
                name.ends_with(BACKUP_SUFFIX)
                    && name
                        .strip_prefix(&prefix)
                        .is_some_and(|rest| !rest.trim_end_matches(BACKUP_SUFFIX).contains('.'))
            })
            .map(|(path, _, _)| path)
            .collect();
        backups.sort();
        Ok(backups)
    }

    /// Remove archives, backups and failed/cancelled checkpoints older than `retention_days`
    pub async fn sweep(&self, retention_days: u64) -> Result<Vec<PathBuf>> {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60)))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = Vec::new();
        for (path, name, modified) in self.entries().await? {
            if modified > cutoff {
                continue;
            }

            let expired = if name.ends_with(ARCHIVE_SUFFIX) || name.ends_with(BACKUP_SUFFIX) {
                true
            } else if name.ends_with(LIVE_SUFFIX) {
                fs::read(&path)
                    .await
                    .ok()
                    .and_then(|bytes| serde_json::from_slice::<ResumeState>(&bytes).ok())
                    .is_some_and(|state| {
                        matches!(state.status, RunStatus::Failed | RunStatus::Cancelled)
                    })
            } else {
                false
            };

            if expired {
                fs::remove_file(&path).await?;
                removed.push(path);
            }
        }

        if !removed.is_empty() {
            tracing::info!(count = removed.len(), dir = %self.dir.display(), "swept expired checkpoints");
        }
        Ok(removed)
    }

    async fn entries(&self) -> Result<Vec<(PathBuf, String, SystemTime)>> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            out.push((entry.path(), name, modified));
        }
        Ok(out)
    }
}

/// Reject ids that could escape the checkpoint directory
///
/// Allowed: ASCII alphanumerics, `-`, `_` and `.` (not leading, no `..`).
pub fn validate_id(workflow_id: &str) -> Result<()> {
    let invalid = |reason: &str| LumenError::InvalidWorkflowId {
        id: workflow_id.to_string(),
        reason: reason.to_string(),
    };

    if workflow_id.is_empty() {
        return Err(invalid("empty"));
    }
    if workflow_id.starts_with('.') || workflow_id.contains("..") {
        return Err(invalid("must not start with '.' or contain '..'"));
    }
    if !workflow_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid("only letters, digits, '-', '_' and '.' are allowed"));
    }
    Ok(())
}

/// Turn an arbitrary workflow name into a valid id fragment
pub fn sanitize_id(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "workflow".to_string()
    } else {
        trimmed.to_string()
    }
}

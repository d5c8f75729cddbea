//! Lumen Configuration Module
//!
//! Config is stored in `~/.config/lumen/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. CLI flags
//! 2. Environment variables (`LUMEN_PROVIDER`, `LUMEN_MODEL`,
//!    `LUMEN_CHECKPOINT_DIR`, `ANTHROPIC_API_KEY`)
//! 3. Config file
//! 4. Defaults

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LumenError, Result};
use crate::util::constants::{
    DEFAULT_MAX_DEPTH, DEFAULT_MAX_TURNS, DEFAULT_RETENTION_DAYS, RUN_TIMEOUT, TOOL_TIMEOUT,
};

/// Local data directory (relative to the working directory)
pub const DATA_DIR: &str = ".lumen";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LumenConfig {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    /// Tool names the validator accepts besides registered and built-in tools
    #[serde(default)]
    pub known_tools: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Provider name (claude, mock)
    pub name: Option<String>,
    /// Model used when a document does not name one
    pub model: Option<String>,
    /// Anthropic API key (sk-ant-...)
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    /// Maximum sub-workflow nesting
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_max_turns() -> u32 {
    DEFAULT_MAX_TURNS
}

fn default_tool_timeout() -> u64 {
    TOOL_TIMEOUT.as_secs()
}

fn default_run_timeout() -> u64 {
    RUN_TIMEOUT.as_secs()
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            tool_timeout_secs: default_tool_timeout(),
            run_timeout_secs: default_run_timeout(),
            max_depth: default_max_depth(),
        }
    }
}

impl RuntimeConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// What happens to a checkpoint once its run completes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnComplete {
    /// Rename to `<id>.completed.json`
    #[default]
    Archive,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointConfig {
    /// Defaults to `.lumen/checkpoints`
    pub dir: Option<PathBuf>,
    /// Keep the previous checkpoint as a timestamped backup on every write
    #[serde(default)]
    pub backup: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default)]
    pub on_complete: OnComplete,
}

fn default_retention_days() -> u64 {
    DEFAULT_RETENTION_DAYS
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: None,
            backup: false,
            retention_days: default_retention_days(),
            on_complete: OnComplete::default(),
        }
    }
}

impl LumenConfig {
    /// `~/.config/lumen/`
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lumen")
    }

    /// `~/.config/lumen/config.toml`
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from the default path; a missing file yields defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| LumenError::ConfigError {
            reason: format!("Failed to read config file: {}", e),
        })?;

        toml::from_str(&content).map_err(|e| LumenError::ConfigError {
            reason: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }

    /// Save to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| LumenError::ConfigError {
                reason: format!("Failed to create config directory: {}", e),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| LumenError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| LumenError::ConfigError {
            reason: format!("Failed to write config file: {}", e),
        })
    }

    /// Merge process environment variables over file values
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Merge variables from an arbitrary lookup (testable without touching the process env)
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(name) = get("LUMEN_PROVIDER") {
            self.provider.name = Some(name);
        }
        if let Some(model) = get("LUMEN_MODEL") {
            self.provider.model = Some(model);
        }
        if let Some(dir) = get("LUMEN_CHECKPOINT_DIR") {
            self.checkpoint.dir = Some(PathBuf::from(dir));
        }

        self
    }

    /// Provider name, defaulting to `claude`
    pub fn provider_name(&self) -> &str {
        self.provider.name.as_deref().unwrap_or("claude")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint
            .dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DATA_DIR).join("checkpoints"))
    }
}

/// Mask an API key for display, e.g. "sk-ant-***"
pub fn mask_api_key(key: &str, visible_chars: usize) -> String {
    if key.is_empty() {
        return String::new();
    }

    let visible = key
        .char_indices()
        .nth(visible_chars)
        .map_or(key.len(), |(i, _)| i);
    format!("{}***", &key[..visible])
}

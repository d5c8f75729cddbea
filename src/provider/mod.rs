//! Provider abstraction layer
//!
//! The engine boundary. Providers speak `anyhow::Result`; the orchestrator
//! wraps failures into `LumenError::Orchestration` after retries.
//!
//! - [`ClaudeProvider`] - Anthropic Messages API over reqwest
//! - [`MockProvider`] - scripted replies, recorded requests

pub mod claude;
pub mod mock;
mod types;

pub use claude::ClaudeProvider;
pub use mock::MockProvider;
pub use types::*;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::LumenConfig;
use crate::error::LumenError;

pub const CLAUDE_DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Instruction-following engine
#[async_trait]
pub trait Provider: Send + Sync {
    /// One conversational turn: full history in, reply (text and/or tool calls) out
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Model used when a document does not name one
    fn default_model(&self) -> &str;

    /// Provider name (e.g., "claude", "mock")
    fn name(&self) -> &str;
}

/// Create a provider by name
pub fn create_provider(name: &str, config: &LumenConfig) -> Result<Arc<dyn Provider>, LumenError> {
    if name.eq_ignore_ascii_case("claude") {
        let key = config
            .provider
            .api_key
            .clone()
            .ok_or_else(|| LumenError::MissingApiKey {
                provider: "claude".to_string(),
            })?;
        let provider = ClaudeProvider::new(key).map_err(|e| LumenError::ConfigError {
            reason: e.to_string(),
        })?;
        Ok(Arc::new(provider))
    } else if name.eq_ignore_ascii_case("mock") {
        Ok(Arc::new(MockProvider::new()))
    } else {
        Err(LumenError::ProviderNotConfigured {
            provider: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_rejected() {
        let err = create_provider("palm", &LumenConfig::default()).err().unwrap();
        assert_eq!(err.code(), "LUMEN-030");
    }

    #[test]
    fn claude_requires_key() {
        let mut config = LumenConfig::default();
        config.provider.api_key = None;
        let err = create_provider("claude", &config).err().unwrap();
        assert_eq!(err.code(), "LUMEN-031");
    }

    #[test]
    fn mock_is_always_available() {
        let provider = create_provider("MOCK", &LumenConfig::default()).unwrap();
        assert_eq!(provider.name(), "mock");
    }
}

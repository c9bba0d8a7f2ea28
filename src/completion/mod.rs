//! Language-model completion clients shared by type validation and field extraction.
//!
//! Both providers expose the same call shape through [`CompletionClient`]: a system prompt and
//! one user message in, the generated text out. Transient failures (connection errors, 429, and
//! 5xx responses) are retried inside the client according to its [`RetryPolicy`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{CompletionProvider, Config, get_config};
use crate::retry::{RetryPolicy, Wait};

mod anthropic;
mod ollama;

pub use anthropic::AnthropicCompletionClient;
pub use ollama::OllamaCompletionClient;

const COMPLETION_ATTEMPTS: u32 = 3;
const COMPLETION_RETRY_WAIT: Duration = Duration::from_secs(2);

/// Errors surfaced while requesting a completion.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Provider could not be reached.
    #[error("Completion provider unavailable: {0}")]
    Unavailable(String),
    /// Provider answered with a non-success status.
    #[error("Completion provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated by the provider.
        body: String,
    },
    /// Provider response could not be decoded or carried no text.
    #[error("Malformed completion response: {0}")]
    InvalidResponse(String),
    /// Client settings are incomplete.
    #[error("Completion provider misconfigured: {0}")]
    Configuration(String),
}

impl CompletionError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) | Self::Configuration(_) => false,
        }
    }
}

/// Sampling settings applied to every request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSettings {
    /// Provider model identifier.
    pub model: String,
    /// Sampling temperature; kept low for deterministic extraction.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

impl CompletionSettings {
    /// Settings taken from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.completion_model.clone(),
            temperature: config.completion_temperature,
            max_tokens: config.completion_max_tokens,
        }
    }
}

/// Interface implemented by completion providers.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate a reply to `user_content` under `system_prompt`.
    async fn complete(
        &self,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<String, CompletionError>;

    /// Model identifier used for requests.
    fn model(&self) -> &str;
}

/// Retry policy applied by the bundled clients.
pub fn default_retry_policy() -> RetryPolicy<CompletionError> {
    RetryPolicy::new(
        "completion",
        COMPLETION_ATTEMPTS,
        Wait::fixed(COMPLETION_RETRY_WAIT),
        CompletionError::is_retryable,
    )
}

pub(crate) fn build_http_client(agent: &str) -> Result<reqwest::Client, CompletionError> {
    reqwest::Client::builder()
        .user_agent(agent)
        .build()
        .map_err(|error| CompletionError::Configuration(error.to_string()))
}

/// Build the completion client selected by `config`.
pub fn create_completion_client(
    config: &Config,
) -> Result<Arc<dyn CompletionClient>, CompletionError> {
    let settings = CompletionSettings::from_config(config);
    let client: Arc<dyn CompletionClient> = match config.completion_provider {
        CompletionProvider::Anthropic => {
            let api_key = config.anthropic_api_key.clone().ok_or_else(|| {
                CompletionError::Configuration("ANTHROPIC_API_KEY is not set".into())
            })?;
            Arc::new(AnthropicCompletionClient::new(api_key, settings)?)
        }
        CompletionProvider::Ollama => {
            let base_url = config
                .ollama_url
                .clone()
                .unwrap_or_else(|| crate::embedding::DEFAULT_OLLAMA_URL.to_string());
            Arc::new(OllamaCompletionClient::new(base_url, settings)?)
        }
    };
    tracing::debug!(
        provider = ?config.completion_provider,
        model = client.model(),
        "Completion client ready"
    );
    Ok(client)
}

/// Build a completion client from the global configuration.
pub fn get_completion_client() -> Result<Arc<dyn CompletionClient>, CompletionError> {
    create_completion_client(get_config())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(CompletionError::Unavailable("refused".into()).is_retryable());
        assert!(
            CompletionError::Status {
                status: 429,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            CompletionError::Status {
                status: 529,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !CompletionError::Status {
                status: 400,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!CompletionError::InvalidResponse("empty".into()).is_retryable());
    }

    #[test]
    fn default_policy_allows_three_attempts() {
        let policy = default_retry_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.wait(), Wait::fixed(Duration::from_secs(2)));
    }
}

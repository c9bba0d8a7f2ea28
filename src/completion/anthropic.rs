use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    CompletionClient, CompletionError, CompletionSettings, build_http_client,
    default_retry_policy,
};
use crate::retry::RetryPolicy;

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for the Anthropic Messages API.
pub struct AnthropicCompletionClient {
    http: Client,
    base_url: String,
    api_key: String,
    settings: CompletionSettings,
    retry: RetryPolicy<CompletionError>,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicCompletionClient {
    /// Create a client for the public Anthropic API.
    pub fn new(api_key: String, settings: CompletionSettings) -> Result<Self, CompletionError> {
        if api_key.trim().is_empty() {
            return Err(CompletionError::Configuration(
                "Anthropic API key must not be empty".into(),
            ));
        }
        Ok(Self {
            http: build_http_client("rustyidu/completion")?,
            base_url: ANTHROPIC_BASE_URL.to_string(),
            api_key,
            settings,
            retry: default_retry_policy(),
        })
    }

    /// Send requests to a different host (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy<CompletionError>) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    async fn send_once(
        &self,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<String, CompletionError> {
        let request = MessagesRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            system: system_prompt,
            messages: [Message {
                role: "user",
                content: user_content,
            }],
        };

        let response = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|error| CompletionError::Unavailable(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status { status, body });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|error| CompletionError::InvalidResponse(error.to_string()))?;
        let text: String = body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        if text.trim().is_empty() {
            return Err(CompletionError::InvalidResponse(
                "response contained no text".into(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl CompletionClient for AnthropicCompletionClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<String, CompletionError> {
        tracing::info!(model = %self.settings.model, "Requesting Anthropic completion");
        self.retry
            .run(|| self.send_once(system_prompt, user_content))
            .await
            .inspect_err(|error| {
                tracing::error!(model = %self.settings.model, error = %error, "Anthropic completion failed");
            })
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

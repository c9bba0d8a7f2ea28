use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{
    CompletionClient, CompletionError, CompletionSettings, build_http_client,
    default_retry_policy,
};
use crate::retry::RetryPolicy;

/// Client for a local Ollama runtime (`/api/chat`, non-streaming).
pub struct OllamaCompletionClient {
    http: Client,
    base_url: String,
    settings: CompletionSettings,
    retry: RetryPolicy<CompletionError>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl OllamaCompletionClient {
    /// Create a client for the runtime at `base_url`.
    pub fn new(base_url: String, settings: CompletionSettings) -> Result<Self, CompletionError> {
        Ok(Self {
            http: build_http_client("rustyidu/completion")?,
            base_url,
            settings,
            retry: default_retry_policy(),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy<CompletionError>) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    async fn send_once(
        &self,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<String, CompletionError> {
        let payload = json!({
            "model": self.settings.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_content }
            ],
            "stream": false,
            "options": {
                "temperature": self.settings.temperature,
                "num_predict": self.settings.max_tokens,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                CompletionError::Unavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CompletionError::Configuration(format!(
                "Ollama endpoint {} returned 404 (is model '{}' pulled?)",
                self.endpoint(),
                self.settings.model
            )));
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status { status, body });
        }

        let body: ChatResponse = response.json().await.map_err(|error| {
            CompletionError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;
        if !body.done {
            return Err(CompletionError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }
        Ok(body.message.content.trim().to_string())
    }
}

#[async_trait]
impl CompletionClient for OllamaCompletionClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_content: &str,
    ) -> Result<String, CompletionError> {
        tracing::info!(model = %self.settings.model, "Requesting Ollama completion");
        self.retry
            .run(|| self.send_once(system_prompt, user_content))
            .await
    }

    fn model(&self) -> &str {
        &self.settings.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Wait;
    use httpmock::{Method::POST, MockServer};

    fn client(server: &MockServer) -> OllamaCompletionClient {
        OllamaCompletionClient::new(
            server.base_url(),
            CompletionSettings {
                model: "llama3.1".into(),
                temperature: 0.1,
                max_tokens: 2000,
            },
        )
        .expect("client")
        .with_retry_policy(default_retry_policy().with_wait(Wait::none()))
    }

    #[tokio::test]
    async fn returns_trimmed_message_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/chat")
                    .body_contains("\"stream\":false")
                    .body_contains("\"role\":\"system\"");
                then.status(200).json_body(json!({
                    "message": { "role": "assistant", "content": "  invoice \n" },
                    "done": true
                }));
            })
            .await;

        let reply = client(&server)
            .complete("system", "user")
            .await
            .expect("completion");

        mock.assert_async().await;
        assert_eq!(reply, "invoice");
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(500).body("boom");
            })
            .await;

        let error = client(&server)
            .complete("system", "user")
            .await
            .expect_err("server error");

        mock.assert_hits_async(3).await;
        assert!(matches!(error, CompletionError::Status { status: 500, ref body } if body == "boom"));
    }

    #[tokio::test]
    async fn missing_model_is_a_configuration_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(404);
            })
            .await;

        let error = client(&server)
            .complete("system", "user")
            .await
            .expect_err("not found");
        assert!(matches!(error, CompletionError::Configuration(_)));
    }
}

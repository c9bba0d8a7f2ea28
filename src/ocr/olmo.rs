//! Remote OCR through an olmOCR model behind an OpenAI-compatible chat-completions endpoint.
//!
//! Requests carry the page as a base64 PNG `image_url` plus a text prompt. The model answers
//! with a JSON envelope whose `natural_text` field holds the page text.
//!
//! Two retry layers wrap every extraction:
//! - an availability layer (7 attempts, long fixed wait) for non-success HTTP statuses, which
//!   is how cold-starting inference endpoints report themselves;
//! - a validation layer (5 attempts, no wait) for transport failures, empty answers, and
//!   answers that are not JSON.
//!
//! Answers that are JSON but lack `natural_text` fail immediately.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::image::png_base64;
use super::{ImageInput, OcrEngine, OcrError, TesseractEngine};
use crate::config::Config;
use crate::prompts::{anchored_ocr_prompt, default_ocr_prompt};
use crate::retry::{RetryPolicy, Wait};

const MAX_TOKENS: u32 = 1000;
const AVAILABILITY_ATTEMPTS: u32 = 7;
const VALIDATION_ATTEMPTS: u32 = 5;

/// Connection settings for the olmOCR endpoint.
#[derive(Debug, Clone)]
pub struct OlmoSettings {
    /// Base URL of the OpenAI-compatible API (the part before `/chat/completions`).
    pub endpoint_url: String,
    /// Bearer token, if the endpoint requires one.
    pub api_key: Option<String>,
    /// Model identifier sent with each request.
    pub model: String,
    /// Wait between attempts while the endpoint reports itself unavailable.
    pub unavailable_wait: Duration,
    /// Tesseract executable used to produce anchor text.
    pub tesseract_bin: String,
    /// Time limit for the local anchor run.
    pub tesseract_timeout: Duration,
}

impl OlmoSettings {
    /// Settings taken from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, OcrError> {
        let endpoint_url = config
            .ocr_endpoint_url
            .clone()
            .ok_or_else(|| OcrError::InvalidInput("OCR_ENDPOINT_URL is not set".into()))?;
        Ok(Self {
            endpoint_url,
            api_key: config.ocr_api_key.clone(),
            model: config.ocr_model.clone(),
            unavailable_wait: Duration::from_secs(config.ocr_unavailable_wait_secs),
            tesseract_bin: config.tesseract_bin.clone(),
            tesseract_timeout: Duration::from_secs(config.tesseract_timeout_secs),
        })
    }
}

/// Response envelope produced by olmOCR. Only `natural_text` is mandatory.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OlmoResponse {
    /// Detected language of the page.
    #[serde(default)]
    pub primary_language: Option<String>,
    /// Whether the page orientation was already correct.
    #[serde(default)]
    pub is_rotation_valid: Option<bool>,
    /// Degrees of rotation the model suggests applying.
    #[serde(default)]
    pub rotation_correction: Option<i64>,
    /// Whether the page is mostly a table.
    #[serde(default)]
    pub is_table: Option<bool>,
    /// Whether the page is mostly a diagram.
    #[serde(default)]
    pub is_diagram: Option<bool>,
    /// Page text in natural reading order.
    #[serde(default)]
    pub natural_text: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OCR engine backed by a remote olmOCR deployment.
pub struct OlmoOcrEngine {
    settings: OlmoSettings,
    http: reqwest::Client,
    anchor_engine: TesseractEngine,
    availability: RetryPolicy<OcrError>,
    validation: RetryPolicy<OcrError>,
}

impl OlmoOcrEngine {
    /// Create an engine with the default retry layers.
    pub fn new(settings: OlmoSettings) -> Result<Self, OcrError> {
        let http = reqwest::Client::builder()
            .user_agent("rustyidu/ocr")
            .build()
            .map_err(|error| OcrError::Transport(error.to_string()))?;
        let availability = RetryPolicy::new(
            "ocr_endpoint_request",
            AVAILABILITY_ATTEMPTS,
            Wait::fixed(settings.unavailable_wait),
            OcrError::is_unavailable,
        );
        let validation = RetryPolicy::new(
            "ocr_extract_text",
            VALIDATION_ATTEMPTS,
            Wait::none(),
            OcrError::is_retryable,
        );
        Ok(Self {
            anchor_engine: TesseractEngine::new(settings.tesseract_bin.clone())
                .with_timeout(settings.tesseract_timeout),
            settings,
            http,
            availability,
            validation,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.endpoint_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, png_base64: &str, prompt: &str) -> Value {
        json!({
            "model": self.settings.model,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:image/png;base64,{png_base64}") }
                        },
                        { "type": "text", "text": prompt }
                    ]
                }
            ],
            "max_tokens": MAX_TOKENS,
            "stream": false
        })
    }

    async fn request_async(&self, body: &Value) -> Result<String, OcrError> {
        let mut request = self.http.post(self.endpoint()).json(body);
        if let Some(api_key) = &self.settings.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|error| OcrError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unavailable(status.as_u16(), body));
        }
        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|error| OcrError::Malformed(error.to_string()))?;
        first_content(completion)
    }

    fn request_blocking(&self, body: &Value) -> Result<String, OcrError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent("rustyidu/ocr")
            .build()
            .map_err(|error| OcrError::Transport(error.to_string()))?;
        let mut request = client.post(self.endpoint()).json(body);
        if let Some(api_key) = &self.settings.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request
            .send()
            .map_err(|error| OcrError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(unavailable(status.as_u16(), body));
        }
        let completion: ChatCompletion = response
            .json()
            .map_err(|error| OcrError::Malformed(error.to_string()))?;
        first_content(completion)
    }
}

/// Normalize the image and pick the prompt, running Tesseract first when anchoring.
fn prepare(
    image: &ImageInput,
    anchor: bool,
    anchor_engine: &TesseractEngine,
) -> Result<(String, String), OcrError> {
    let bytes = image.load_bytes()?;
    let encoded = png_base64(&bytes)?;
    let prompt = if anchor {
        let anchor_text = anchor_engine.extract_text(&ImageInput::Bytes(bytes), false)?;
        anchored_ocr_prompt(&anchor_text)
    } else {
        default_ocr_prompt().to_string()
    };
    Ok((encoded, prompt))
}

fn unavailable(status: u16, body: String) -> OcrError {
    tracing::warn!(status, "OCR service unavailable");
    OcrError::Unavailable { status, body }
}

fn first_content(completion: ChatCompletion) -> Result<String, OcrError> {
    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(OcrError::EmptyResponse)?;
    tracing::debug!(chars = content.len(), "OCR endpoint answered");
    Ok(content)
}

/// Validate the model's JSON answer and return its `natural_text`.
pub fn parse_ocr_response(content: &str) -> Result<String, OcrError> {
    let value: Value = serde_json::from_str(content).map_err(|error| {
        tracing::error!(error = %error, "Failed to parse OCR response JSON");
        OcrError::Malformed(error.to_string())
    })?;
    let envelope: OlmoResponse = serde_json::from_value(value)
        .map_err(|error| OcrError::SchemaViolation(error.to_string()))?;
    tracing::debug!(
        language = ?envelope.primary_language,
        rotation_valid = ?envelope.is_rotation_valid,
        rotation_correction = ?envelope.rotation_correction,
        is_table = ?envelope.is_table,
        is_diagram = ?envelope.is_diagram,
        "OCR response envelope"
    );
    envelope.natural_text.ok_or_else(|| {
        tracing::error!("OCR response lacks natural_text");
        OcrError::SchemaViolation("missing field `natural_text`".into())
    })
}

#[async_trait]
impl OcrEngine for OlmoOcrEngine {
    fn name(&self) -> &'static str {
        "olmo_ocr"
    }

    fn extract_text(&self, image: &ImageInput, anchor: bool) -> Result<String, OcrError> {
        self.validation.run_blocking(|| {
            let (encoded, prompt) = prepare(image, anchor, &self.anchor_engine)?;
            let body = self.request_body(&encoded, &prompt);
            let content = self
                .availability
                .run_blocking(|| self.request_blocking(&body))?;
            parse_ocr_response(&content)
        })
    }

    async fn extract_text_async(
        &self,
        image: &ImageInput,
        anchor: bool,
    ) -> Result<String, OcrError> {
        self.validation
            .run(|| {
                let image = image.clone();
                let anchor_engine = self.anchor_engine.clone();
                async move {
                    let (encoded, prompt) = tokio::task::spawn_blocking(move || {
                        prepare(&image, anchor, &anchor_engine)
                    })
                    .await
                    .map_err(|error| OcrError::Engine(error.to_string()))??;
                    let body = self.request_body(&encoded, &prompt);
                    let content = self.availability.run(|| self.request_async(&body)).await?;
                    parse_ocr_response(&content)
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::image::sample_image;
    use httpmock::{Method::POST, MockServer};

    fn settings(server: &MockServer) -> OlmoSettings {
        OlmoSettings {
            endpoint_url: format!("{}/v1", server.base_url()),
            api_key: Some("hf-token".into()),
            model: "tgi".into(),
            unavailable_wait: Duration::ZERO,
            tesseract_bin: "/nonexistent/tesseract".into(),
            tesseract_timeout: Duration::from_secs(1),
        }
    }

    fn engine(server: &MockServer) -> OlmoOcrEngine {
        OlmoOcrEngine::new(settings(server)).expect("engine")
    }

    fn completion(content: Value) -> Value {
        json!({
            "choices": [ { "index": 0, "message": { "role": "assistant", "content": content } } ]
        })
    }

    fn png_input() -> ImageInput {
        ImageInput::Bytes(sample_image(::image::ImageFormat::Png))
    }

    #[test]
    fn envelope_requires_natural_text() {
        let text = parse_ocr_response(
            r#"{"primary_language":"en","is_rotation_valid":true,"rotation_correction":0,
                "is_table":false,"is_diagram":false,"natural_text":"INVOICE #123"}"#,
        )
        .expect("valid envelope");
        assert_eq!(text, "INVOICE #123");

        let error = parse_ocr_response(r#"{"primary_language":"en"}"#).expect_err("missing");
        assert!(matches!(error, OcrError::SchemaViolation(_)));

        let error = parse_ocr_response("plain text answer").expect_err("not json");
        assert!(matches!(error, OcrError::Malformed(_)));
    }

    #[tokio::test]
    async fn sends_png_data_url_and_returns_natural_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer hf-token")
                    .body_contains("data:image/png;base64,")
                    .body_contains("\"max_tokens\":1000")
                    .body_contains("\"model\":\"tgi\"")
                    .body_contains("Just return the plain text representation");
                then.status(200).json_body(completion(json!(
                    "{\"natural_text\": \"INVOICE #123 Total: $450\"}"
                )));
            })
            .await;

        let text = engine(&server)
            .extract_text_async(&png_input(), false)
            .await
            .expect("text");

        mock.assert_async().await;
        assert_eq!(text, "INVOICE #123 Total: $450");
    }

    #[tokio::test]
    async fn unavailable_endpoint_is_retried_by_the_inner_layer() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(503).body("model is loading");
            })
            .await;

        let error = engine(&server)
            .extract_text_async(&png_input(), false)
            .await
            .expect_err("unavailable");

        mock.assert_hits_async(7).await;
        assert!(matches!(error, OcrError::Unavailable { status: 503, .. }));
    }

    #[tokio::test]
    async fn empty_answers_are_retried_by_the_outer_layer() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(completion(json!("")));
            })
            .await;

        let error = engine(&server)
            .extract_text_async(&png_input(), false)
            .await
            .expect_err("empty");

        mock.assert_hits_async(5).await;
        assert!(matches!(error, OcrError::EmptyResponse));
    }

    #[tokio::test]
    async fn schema_violations_are_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .json_body(completion(json!("{\"primary_language\": \"en\"}")));
            })
            .await;

        let error = engine(&server)
            .extract_text_async(&png_input(), false)
            .await
            .expect_err("schema");

        mock.assert_hits_async(1).await;
        assert!(matches!(error, OcrError::SchemaViolation(_)));
    }

    #[tokio::test]
    async fn undecodable_images_fail_without_a_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200);
            })
            .await;

        let error = engine(&server)
            .extract_text_async(&ImageInput::Bytes(b"not an image".to_vec()), false)
            .await
            .expect_err("bad image");

        mock.assert_hits_async(0).await;
        assert!(matches!(error, OcrError::Image(_)));
    }

    #[test]
    fn blocking_entry_point_accepts_base64() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .json_body(completion(json!("{\"natural_text\": \"Dear Sir\"}")));
        });

        let encoded = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            sample_image(::image::ImageFormat::Png),
        );
        let text = engine(&server)
            .extract_text(&ImageInput::Base64(encoded), false)
            .expect("text");

        mock.assert();
        assert_eq!(text, "Dear Sir");
    }
}

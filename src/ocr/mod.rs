//! Text extraction (OCR) engines.
//!
//! Engines implement [`OcrEngine`], which offers a blocking and an async entry point over the
//! same [`ImageInput`]. The local Tesseract engine only supports the blocking form; the remote
//! olmOCR engine supports both and can prime the model with Tesseract output ("anchor text").

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use crate::config::{Config, OcrEngineKind};

pub mod image;
pub mod olmo;
pub mod tesseract;

pub use olmo::{OlmoOcrEngine, OlmoSettings};
pub use tesseract::TesseractEngine;

/// Errors raised by OCR engines.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Caller supplied no input, several inputs, or an unreadable one.
    #[error("Invalid OCR input: {0}")]
    InvalidInput(String),
    /// The engine does not implement the requested entry point.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
    /// The image could not be decoded or re-encoded as PNG.
    #[error("Image conversion failed: {0}")]
    Image(String),
    /// The OCR service answered with a non-success status (cold start, overload).
    #[error("OCR service unavailable ({status}): {body}")]
    Unavailable {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// The request failed before a response arrived.
    #[error("OCR request failed: {0}")]
    Transport(String),
    /// The service answered without any text.
    #[error("No text extracted from the image")]
    EmptyResponse,
    /// The service answered with a body that is not valid JSON.
    #[error("Malformed OCR response: {0}")]
    Malformed(String),
    /// The JSON answer lacks the `natural_text` field.
    #[error("OCR response violates schema: {0}")]
    SchemaViolation(String),
    /// The local engine failed to run or exited unsuccessfully.
    #[error("OCR engine failed: {0}")]
    Engine(String),
}

impl OcrError {
    /// Availability failures, retried with a long fixed wait.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Failures worth an immediate re-request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::EmptyResponse | Self::Malformed(_)
        )
    }
}

/// One image handed to an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageInput {
    /// Image file on disk.
    Path(PathBuf),
    /// Encoded image bytes (PNG, JPEG, TIFF).
    Bytes(Vec<u8>),
    /// Base64-encoded image, optionally as a `data:` URL. Remote engines only.
    Base64(String),
}

impl ImageInput {
    /// Encoded image bytes, reading the file or decoding base64 as needed.
    pub fn load_bytes(&self) -> Result<Vec<u8>, OcrError> {
        match self {
            Self::Path(path) => std::fs::read(path).map_err(|error| {
                OcrError::InvalidInput(format!("cannot read {}: {error}", path.display()))
            }),
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::Base64(encoded) => {
                let payload = encoded
                    .split_once(";base64,")
                    .map_or(encoded.as_str(), |(_, data)| data);
                STANDARD
                    .decode(payload.trim())
                    .map_err(|error| OcrError::InvalidInput(format!("invalid base64 image: {error}")))
            }
        }
    }

    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("{} bytes", bytes.len()),
            Self::Base64(encoded) => format!("{} base64 chars", encoded.len()),
        }
    }
}

/// Loosely-typed input as supplied by callers; exactly one field must be set.
#[derive(Debug, Clone, Default)]
pub struct ImageSource {
    /// Image file on disk.
    pub path: Option<PathBuf>,
    /// Encoded image bytes.
    pub bytes: Option<Vec<u8>>,
    /// Base64-encoded image.
    pub base64: Option<String>,
}

impl ImageSource {
    /// Collapse the source into a single [`ImageInput`].
    pub fn resolve(self) -> Result<ImageInput, OcrError> {
        match (self.path, self.bytes, self.base64) {
            (Some(path), None, None) => Ok(ImageInput::Path(path)),
            (None, Some(bytes), None) => Ok(ImageInput::Bytes(bytes)),
            (None, None, Some(encoded)) => Ok(ImageInput::Base64(encoded)),
            (None, None, None) => Err(OcrError::InvalidInput(
                "one of path, bytes or base64 must be provided".into(),
            )),
            _ => Err(OcrError::InvalidInput(
                "only one of path, bytes or base64 may be provided".into(),
            )),
        }
    }
}

/// Interface implemented by OCR engines.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Engine identifier used in logs.
    fn name(&self) -> &'static str;

    /// Extract text, blocking the current thread. Must not be called from async code.
    fn extract_text(&self, image: &ImageInput, anchor: bool) -> Result<String, OcrError>;

    /// Extract text without blocking the executor.
    async fn extract_text_async(
        &self,
        image: &ImageInput,
        anchor: bool,
    ) -> Result<String, OcrError>;

    /// Whether [`OcrEngine::extract_text_async`] is implemented. Engines answering `false`
    /// are driven through the blocking pool by [`extract_text_on_runtime`].
    fn supports_async(&self) -> bool {
        true
    }
}

/// Extract text from async code with any engine.
///
/// Blocking-only engines run their synchronous path on tokio's blocking pool so the
/// executor keeps serving other tasks.
pub async fn extract_text_on_runtime(
    engine: &Arc<dyn OcrEngine>,
    image: &ImageInput,
    anchor: bool,
) -> Result<String, OcrError> {
    if engine.supports_async() {
        return engine.extract_text_async(image, anchor).await;
    }
    let engine = Arc::clone(engine);
    let image = image.clone();
    tokio::task::spawn_blocking(move || engine.extract_text(&image, anchor))
        .await
        .map_err(|error| OcrError::Engine(format!("blocking OCR task failed: {error}")))?
}

/// Build the engine identified by `kind`.
pub fn create_ocr_engine(
    kind: OcrEngineKind,
    config: &Config,
) -> Result<Arc<dyn OcrEngine>, OcrError> {
    let engine: Arc<dyn OcrEngine> = match kind {
        OcrEngineKind::Tesseract => Arc::new(
            TesseractEngine::new(config.tesseract_bin.clone())
                .with_timeout(Duration::from_secs(config.tesseract_timeout_secs)),
        ),
        OcrEngineKind::OlmoOcr => Arc::new(OlmoOcrEngine::new(OlmoSettings::from_config(config)?)?),
    };
    tracing::debug!(engine = engine.name(), "OCR engine ready");
    Ok(engine)
}

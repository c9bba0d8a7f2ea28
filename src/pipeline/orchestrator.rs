//! Single-document pipeline: OCR, similarity lookup, type validation, and field extraction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::completion::{CompletionClient, create_completion_client};
use crate::config::Config;
use crate::doc_types::DocumentTypeConfig;
use crate::index::{DEFAULT_QUERY_LIMIT, SimilarityIndex, open_configured_index};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::ocr::{ImageInput, OcrEngine, create_ocr_engine, extract_text_on_runtime};
use crate::parsing::parse_json;
use crate::prompts::{PromptBuilder, wrap_document_text};
use crate::retry::{RetryPolicy, Wait};

use super::types::{ExtractionResult, PipelineError, PipelineStage, reconcile};

/// Outer policy around a whole run. Inner clients already retry their own transient failures,
/// so no error class is retried here unless the caller installs a predicate.
pub fn default_retry_policy() -> RetryPolicy<PipelineError> {
    RetryPolicy::new(
        "extract_entities",
        3,
        Wait::fixed_with_jitter(Duration::from_secs(3), Duration::from_secs(2)),
        |_| false,
    )
}

/// Runs documents through OCR, retrieval, validation, and extraction.
pub struct Pipeline {
    ocr: Arc<dyn OcrEngine>,
    index: Arc<dyn SimilarityIndex>,
    completion: Arc<dyn CompletionClient>,
    document_types: &'static DocumentTypeConfig,
    metrics: PipelineMetrics,
    retry: RetryPolicy<PipelineError>,
    anchor: bool,
    query_limit: usize,
}

impl Pipeline {
    /// Assemble a pipeline over explicit components. The index must already have an active
    /// collection.
    pub fn new(
        ocr: Arc<dyn OcrEngine>,
        index: Arc<dyn SimilarityIndex>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            ocr,
            index,
            completion,
            document_types: DocumentTypeConfig::builtin(),
            metrics: PipelineMetrics::new(),
            retry: default_retry_policy(),
            anchor: false,
            query_limit: DEFAULT_QUERY_LIMIT,
        }
    }

    /// Build every component from `config` and open the configured collection.
    pub async fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let ocr = create_ocr_engine(config.ocr_engine, config)?;
        let index = open_configured_index(config).await?;
        let completion = create_completion_client(config)?;
        info!(
            ocr = ocr.name(),
            index = index.backend(),
            model = completion.model(),
            "Pipeline ready"
        );
        Ok(Self::new(ocr, index, completion).with_anchor(config.ocr_anchor))
    }

    /// Replace the outer retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy<PipelineError>) -> Self {
        self.retry = retry;
        self
    }

    /// Ask the OCR engine to prime the model with anchor text.
    pub fn with_anchor(mut self, anchor: bool) -> Self {
        self.anchor = anchor;
        self
    }

    /// Number of neighbours fetched during retrieval.
    pub fn with_query_limit(mut self, limit: usize) -> Self {
        self.query_limit = limit.max(1);
        self
    }

    /// Counters for runs handled by this pipeline.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Extract structured fields from an encoded image.
    pub async fn run(&self, image_bytes: Vec<u8>) -> Result<ExtractionResult, PipelineError> {
        let image = ImageInput::Bytes(image_bytes);
        let span = info_span!("pipeline_run", input = %image.describe());
        let outcome = self
            .retry
            .run(|| self.run_once(&image))
            .instrument(span)
            .await;

        match &outcome {
            Ok(result) => {
                self.metrics.record_success(result.confidence.is_none());
                info!(
                    document_type = %result.document_type,
                    confidence = ?result.confidence,
                    processing_time = result.processing_time,
                    "Extraction complete"
                );
            }
            Err(err) => {
                self.metrics.record_failure();
                error!(
                    stage = err.stage().map(PipelineStage::as_str),
                    error = %err,
                    "Extraction failed"
                );
            }
        }
        outcome
    }

    /// Blocking wrapper around [`Pipeline::run`]. Must not be called from inside a runtime.
    pub fn run_blocking(&self, image_bytes: Vec<u8>) -> Result<ExtractionResult, PipelineError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run(image_bytes))
    }

    async fn run_once(&self, image: &ImageInput) -> Result<ExtractionResult, PipelineError> {
        let text = extract_text_on_runtime(&self.ocr, image, self.anchor).await?;
        let started = Instant::now();
        debug!(stage = %PipelineStage::Ocr, chars = text.len(), "Text extracted");

        let neighbours = self.index.query(&text, self.query_limit).await?;
        let top = neighbours.top().ok_or(PipelineError::NoMatches)?;
        let retrieved_type = top
            .document_type()
            .ok_or(PipelineError::MissingDocumentType)?
            .to_string();
        debug!(
            stage = %PipelineStage::Retrieve,
            document_type = %retrieved_type,
            confidence = top.confidence,
            distance = top.distance,
            "Nearest document found"
        );

        let prompts = PromptBuilder::new(self.document_types);
        let user_content = wrap_document_text(&text);
        let reply = self
            .completion
            .complete(&prompts.validation_prompt(&retrieved_type), &user_content)
            .await?;
        let validated_type = reply.trim().to_lowercase();
        if !self.document_types.contains(&validated_type) {
            return Err(PipelineError::UnknownDocumentType(validated_type));
        }

        let reconciled = reconcile(&retrieved_type, top.confidence, &validated_type);
        if reconciled.overridden {
            warn!(
                stage = %PipelineStage::Reconcile,
                retrieved = %retrieved_type,
                validated = %validated_type,
                "Validation overrode the retrieved document type"
            );
        }

        let system_prompt = prompts.extraction_prompt(&reconciled.document_type, None)?;
        let reply = self
            .completion
            .complete(&system_prompt, &user_content)
            .await?;
        let entities = parse_json(&reply)?;
        debug!(stage = %PipelineStage::Parse, fields = entities.len(), "Entities parsed");

        Ok(ExtractionResult {
            document_type: reconciled.document_type,
            confidence: reconciled.confidence,
            entities,
            processing_time: round_hundredths(started.elapsed().as_secs_f64()),
        })
    }
}

fn round_hundredths(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_time_is_rounded() {
        assert_eq!(round_hundredths(1.23456), 1.23);
        assert_eq!(round_hundredths(0.005), 0.01);
        assert_eq!(round_hundredths(0.0), 0.0);
    }

    #[test]
    fn default_policy_never_retries() {
        let policy = default_retry_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert!(!policy.should_retry(&PipelineError::NoMatches));
        assert!(!policy.should_retry(&PipelineError::UnknownDocumentType("x".into())));
    }
}

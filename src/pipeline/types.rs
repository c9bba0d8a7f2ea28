//! Result, stage, and error types of the extraction pipeline.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::completion::CompletionError;
use crate::index::IndexError;
use crate::ocr::OcrError;
use crate::parsing::ParseError;
use crate::prompts::PromptError;

/// Structured output of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    /// Final document type, always a configured key.
    pub document_type: String,
    /// Similarity confidence of the retrieved type; `None` when validation overrode it.
    pub confidence: Option<f64>,
    /// Extracted fields keyed by field name.
    pub entities: Map<String, Value>,
    /// Seconds from the end of OCR to result assembly, rounded to hundredths.
    pub processing_time: f64,
}

/// Stages of a pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Text extraction from the image.
    Ocr,
    /// Nearest-neighbour lookup of the document type.
    Retrieve,
    /// Model confirmation of the retrieved type.
    ValidateType,
    /// Resolution of disagreement between retrieval and validation.
    Reconcile,
    /// Model extraction of the type's fields.
    Extract,
    /// Conversion of the model reply into a JSON object.
    Parse,
    /// Construction of the [`ExtractionResult`].
    Assemble,
}

impl PipelineStage {
    /// Lowercase stage name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ocr => "ocr",
            Self::Retrieve => "retrieve",
            Self::ValidateType => "validate_type",
            Self::Reconcile => "reconcile",
            Self::Extract => "extract",
            Self::Parse => "parse",
            Self::Assemble => "assemble",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Text extraction failed after the engine's own retries.
    #[error("OCR failed: {0}")]
    Ocr(#[from] OcrError),
    /// The similarity index could not be queried.
    #[error("Similarity lookup failed: {0}")]
    Index(#[from] IndexError),
    /// The completion backend failed after its own retries.
    #[error("Completion failed: {0}")]
    Completion(#[from] CompletionError),
    /// A prompt could not be rendered.
    #[error(transparent)]
    Prompt(#[from] PromptError),
    /// The extraction reply was not a structured object.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The index returned no neighbours.
    #[error("No similar documents found in the index")]
    NoMatches,
    /// The nearest neighbour carries no `document_type` metadata.
    #[error("Nearest document has no document_type metadata")]
    MissingDocumentType,
    /// Validation answered with something that is not a configured type.
    #[error("Document type validation failed: '{0}' is not a configured document type")]
    UnknownDocumentType(String),
    /// The blocking entry point could not start its runtime.
    #[error("Pipeline runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl PipelineError {
    /// Stage that produced the error.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Ocr(_) => Some(PipelineStage::Ocr),
            Self::Index(_) | Self::NoMatches | Self::MissingDocumentType => {
                Some(PipelineStage::Retrieve)
            }
            Self::UnknownDocumentType(_) => Some(PipelineStage::ValidateType),
            Self::Prompt(_) => Some(PipelineStage::Extract),
            Self::Parse(_) => Some(PipelineStage::Parse),
            Self::Completion(_) | Self::Runtime(_) => None,
        }
    }

    /// Whether the underlying component classified the failure as transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Ocr(err) => err.is_retryable() || err.is_unavailable(),
            Self::Index(err) => err.is_retryable(),
            Self::Completion(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Outcome of comparing the retrieved type with the validated one.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// Type used for extraction.
    pub document_type: String,
    /// Retrieval confidence, cleared when the type was overridden.
    pub confidence: Option<f64>,
    /// Whether validation replaced the retrieved type.
    pub overridden: bool,
}

/// Adopt the validated type; a disagreement clears the confidence.
pub fn reconcile(retrieved_type: &str, confidence: f64, validated_type: &str) -> Reconciled {
    if validated_type == retrieved_type {
        Reconciled {
            document_type: retrieved_type.to_string(),
            confidence: Some(confidence),
            overridden: false,
        }
    } else {
        Reconciled {
            document_type: validated_type.to_string(),
            confidence: None,
            overridden: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn agreement_keeps_confidence() {
        let outcome = reconcile("memo", 0.8, "memo");
        assert_eq!(outcome.document_type, "memo");
        assert_eq!(outcome.confidence, Some(0.8));
        assert!(!outcome.overridden);
    }

    #[test]
    fn disagreement_adopts_validated_type_and_clears_confidence() {
        let outcome = reconcile("memo", 0.8, "letter");
        assert_eq!(outcome.document_type, "letter");
        assert_eq!(outcome.confidence, None);
        assert!(outcome.overridden);
    }

    #[test]
    fn result_serializes_null_confidence() {
        let result = ExtractionResult {
            document_type: "letter".into(),
            confidence: None,
            entities: Map::new(),
            processing_time: 1.25,
        };
        assert_eq!(
            serde_json::to_value(&result).expect("serialize"),
            json!({
                "document_type": "letter",
                "confidence": null,
                "entities": {},
                "processing_time": 1.25
            })
        );
    }

    #[test]
    fn errors_report_their_stage() {
        assert_eq!(
            PipelineError::UnknownDocumentType("receipt".into()).stage(),
            Some(PipelineStage::ValidateType)
        );
        assert_eq!(PipelineError::NoMatches.stage(), Some(PipelineStage::Retrieve));
        assert_eq!(PipelineStage::ValidateType.to_string(), "validate_type");
    }

    #[test]
    fn transient_errors_follow_component_classification() {
        assert!(PipelineError::Ocr(OcrError::EmptyResponse).is_transient());
        assert!(
            PipelineError::Completion(CompletionError::Unavailable("reset".into())).is_transient()
        );
        assert!(!PipelineError::Index(IndexError::Uninitialized).is_transient());
        assert!(!PipelineError::MissingDocumentType.is_transient());
    }
}

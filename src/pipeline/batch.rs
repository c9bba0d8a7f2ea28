//! Concurrent OCR over many images with per-item isolation and a single retry pass.

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::ocr::{ImageInput, OcrEngine, extract_text_on_runtime};

/// Default number of images processed concurrently.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Errors that abort a batch as a whole.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Batch size must be positive.
    #[error("Batch size must be at least 1")]
    InvalidBatchSize,
    /// Inputs and metadata were not paired one to one.
    #[error("Input count ({inputs}) does not match metadata count ({metadatas})")]
    LengthMismatch {
        /// Number of images.
        inputs: usize,
        /// Number of metadata maps.
        metadatas: usize,
    },
    /// Extracted texts and metadata drifted apart.
    #[error("Extracted text count ({texts}) does not match metadata count ({metadatas})")]
    CountMismatch {
        /// Number of texts.
        texts: usize,
        /// Number of metadata maps.
        metadatas: usize,
    },
}

/// An image that still failed after the retry pass.
#[derive(Debug, Clone)]
pub struct FailedItem {
    /// Position of the item in the original input.
    pub index: usize,
    /// The image itself.
    pub input: ImageInput,
    /// Metadata supplied with it.
    pub metadata: Map<String, Value>,
    /// Rendered error of the last attempt.
    pub error: String,
}

/// Texts that were extracted, aligned with their metadata and original positions.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Extracted texts.
    pub texts: Vec<String>,
    /// Metadata of each text.
    pub metadatas: Vec<Map<String, Value>>,
    /// Original input position of each text.
    pub indices: Vec<usize>,
    /// Items that failed both passes.
    pub failed: Vec<FailedItem>,
}

impl BatchOutcome {
    /// Number of extracted texts.
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    /// True when nothing was extracted.
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

struct Pending {
    index: usize,
    input: ImageInput,
    metadata: Map<String, Value>,
}

#[derive(Default)]
struct Pass {
    texts: Vec<String>,
    metadatas: Vec<Map<String, Value>>,
    indices: Vec<usize>,
    failed: Vec<(Pending, String)>,
}

/// Fans images out to an OCR engine in fixed-size groups.
#[derive(Clone)]
pub struct BatchCoordinator {
    ocr: Arc<dyn OcrEngine>,
    batch_size: usize,
    anchor: bool,
}

impl BatchCoordinator {
    /// Process `batch_size` images at a time through `ocr`.
    pub fn new(ocr: Arc<dyn OcrEngine>, batch_size: usize) -> Result<Self, BatchError> {
        if batch_size == 0 {
            return Err(BatchError::InvalidBatchSize);
        }
        Ok(Self {
            ocr,
            batch_size,
            anchor: false,
        })
    }

    /// Request anchor text from the OCR engine for every item.
    pub fn with_anchor(mut self, anchor: bool) -> Self {
        self.anchor = anchor;
        self
    }

    /// Configured group size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Extract text from every image. Failures are retried once, grouped the same way; items
    /// that fail twice are reported in [`BatchOutcome::failed`] instead of aborting the batch.
    pub async fn process(
        &self,
        inputs: Vec<ImageInput>,
        metadatas: Vec<Map<String, Value>>,
    ) -> Result<BatchOutcome, BatchError> {
        if inputs.len() != metadatas.len() {
            return Err(BatchError::LengthMismatch {
                inputs: inputs.len(),
                metadatas: metadatas.len(),
            });
        }

        let pending: Vec<Pending> = inputs
            .into_iter()
            .zip(metadatas)
            .enumerate()
            .map(|(index, (input, metadata))| Pending {
                index,
                input,
                metadata,
            })
            .collect();
        let total = pending.len();

        let first = self.run_pass(pending, "initial").await;
        let mut outcome = BatchOutcome {
            texts: first.texts,
            metadatas: first.metadatas,
            indices: first.indices,
            failed: Vec::new(),
        };

        if !first.failed.is_empty() {
            info!(count = first.failed.len(), "Retrying failed items");
            let retry = self
                .run_pass(first.failed.into_iter().map(|(item, _)| item).collect(), "retry")
                .await;
            outcome.texts.extend(retry.texts);
            outcome.metadatas.extend(retry.metadatas);
            outcome.indices.extend(retry.indices);
            outcome.failed = retry
                .failed
                .into_iter()
                .map(|(item, error)| FailedItem {
                    index: item.index,
                    input: item.input,
                    metadata: item.metadata,
                    error,
                })
                .collect();
        }

        if outcome.texts.len() != outcome.metadatas.len() {
            return Err(BatchError::CountMismatch {
                texts: outcome.texts.len(),
                metadatas: outcome.metadatas.len(),
            });
        }
        for item in &outcome.failed {
            warn!(index = item.index, input = %item.input.describe(), error = %item.error, "Item failed after retry");
        }
        info!(
            total,
            extracted = outcome.len(),
            failed = outcome.failed.len(),
            "Batch processing finished"
        );
        Ok(outcome)
    }

    async fn run_pass(&self, items: Vec<Pending>, pass: &'static str) -> Pass {
        let groups = items.len().div_ceil(self.batch_size);
        let mut result = Pass::default();
        let mut items = items.into_iter().peekable();
        let mut group_number = 0;

        while items.peek().is_some() {
            group_number += 1;
            let group: Vec<Pending> = items.by_ref().take(self.batch_size).collect();
            info!(pass, group = group_number, groups, size = group.len(), "Processing batch");

            let extractions = join_all(
                group
                    .iter()
                    .map(|item| extract_text_on_runtime(&self.ocr, &item.input, self.anchor)),
            )
            .await;

            for (item, extraction) in group.into_iter().zip(extractions) {
                match extraction {
                    Ok(text) => {
                        result.texts.push(text);
                        result.metadatas.push(item.metadata);
                        result.indices.push(item.index);
                    }
                    Err(error) => {
                        warn!(pass, index = item.index, error = %error, "OCR failed for item");
                        result.failed.push((item, error.to_string()));
                    }
                }
            }
        }
        result
    }
}

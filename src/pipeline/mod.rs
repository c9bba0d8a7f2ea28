//! Extraction pipeline orchestration and batch OCR fan-out.
//!
//! [`Pipeline`] turns one image into an [`ExtractionResult`]: OCR, nearest-neighbour lookup of
//! the document type, model validation of that type, and model extraction of its fields.
//! [`BatchCoordinator`] runs OCR over many images concurrently for index population.

pub mod batch;
pub mod orchestrator;
pub mod types;

pub use batch::{BatchCoordinator, BatchError, BatchOutcome, DEFAULT_BATCH_SIZE, FailedItem};
pub use orchestrator::{Pipeline, default_retry_policy};
pub use types::{ExtractionResult, PipelineError, PipelineStage, Reconciled, reconcile};

#![deny(missing_docs)]

//! Core library for the Rusty IDU document-understanding pipeline.

/// LLM completion client abstraction and adapters.
pub mod completion;
/// Environment-driven configuration management.
pub mod config;
/// Static document-type taxonomy.
pub mod doc_types;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Similarity index clients (Qdrant, in-memory).
pub mod index;
/// Dataset ingestion into the similarity index.
pub mod ingest;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline run counters.
pub mod metrics;
/// Text extraction (OCR) engines.
pub mod ocr;
/// Tolerant JSON extraction from model output.
pub mod parsing;
/// Extraction pipeline orchestration and batch fan-out.
pub mod pipeline;
/// Prompt rendering for OCR, type validation, and field extraction.
pub mod prompts;
/// Retry policies shared by the backend clients and the orchestrator.
pub mod retry;

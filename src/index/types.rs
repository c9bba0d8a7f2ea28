//! Shared types used by the similarity index backends.

use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::embedding::{EmbeddingClient, EmbeddingClientError};

/// Errors returned while interacting with a similarity index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// `add` or `query` was called before `get_or_create_index`.
    #[error("Collection not initialized. Call get_or_create_index first.")]
    Uninitialized,
    /// Metadata list length differs from the document list length.
    #[error("Length of metadatas ({metadatas}) must match length of documents ({documents})")]
    LengthMismatch {
        /// Number of documents supplied.
        documents: usize,
        /// Number of metadata maps supplied.
        metadatas: usize,
    },
    /// Explicit id list length differs from the document list length.
    #[error("Length of ids ({ids}) must match length of documents ({documents})")]
    IdCountMismatch {
        /// Number of documents supplied.
        documents: usize,
        /// Number of ids supplied.
        ids: usize,
    },
    /// Embedding the documents or the query failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Base URL failed to parse or normalize.
    #[error("Invalid index URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend responded with an unexpected status code.
    #[error("Unexpected index response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the backend.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Backend answered with a body that does not match the expected shape.
    #[error("Malformed index response: {0}")]
    InvalidResponse(String),
}

impl IndexError {
    /// Whether the failure came from an unreachable or overloaded backend.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::UnexpectedStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Embedding(EmbeddingClientError::ProviderUnavailable(_)) => true,
            _ => false,
        }
    }
}

/// Active collection: its name, its metadata, and the embedder used for adds and queries.
#[derive(Clone)]
pub struct IndexHandle {
    pub(crate) name: String,
    pub(crate) metadata: Map<String, Value>,
    pub(crate) embedder: Arc<dyn EmbeddingClient>,
}

impl IndexHandle {
    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection metadata supplied (or defaulted) at creation.
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Dimension of the vectors stored in the collection.
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }
}

impl fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHandle")
            .field("name", &self.name)
            .field("metadata", &self.metadata)
            .field("dimension", &self.embedder.dimension())
            .finish()
    }
}

/// One nearest neighbour returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatch {
    /// Identifier of the stored document.
    pub id: String,
    /// Stored document text.
    pub document: String,
    /// Stored metadata, including `document_type`.
    pub metadata: Map<String, Value>,
    /// Cosine distance between the query and the document.
    pub distance: f64,
    /// Distance mapped into `[0, 1]`; see [`distance_to_confidence`](super::distance_to_confidence).
    pub confidence: f64,
}

impl SimilarityMatch {
    /// `document_type` recorded in the metadata, if present and a string.
    pub fn document_type(&self) -> Option<&str> {
        self.metadata.get("document_type").and_then(Value::as_str)
    }
}

/// Columnar query result, nearest first. All columns have the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    /// Document identifiers.
    pub ids: Vec<String>,
    /// Document texts.
    pub documents: Vec<String>,
    /// Document metadata.
    pub metadatas: Vec<Map<String, Value>>,
    /// Cosine distances.
    pub distances: Vec<f64>,
    /// Confidences derived from the distances.
    pub confidences: Vec<f64>,
}

impl QueryResult {
    /// Assemble a result from row-oriented matches.
    pub fn from_matches(matches: Vec<SimilarityMatch>) -> Self {
        let mut result = Self::default();
        for hit in matches {
            result.ids.push(hit.id);
            result.documents.push(hit.document);
            result.metadatas.push(hit.metadata);
            result.distances.push(hit.distance);
            result.confidences.push(hit.confidence);
        }
        result
    }

    /// Number of neighbours returned.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the query returned nothing.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Nearest neighbour, if any.
    pub fn top(&self) -> Option<SimilarityMatch> {
        self.matches().next()
    }

    /// Iterate rows, nearest first.
    pub fn matches(&self) -> impl Iterator<Item = SimilarityMatch> + '_ {
        (0..self.len()).map(|row| SimilarityMatch {
            id: self.ids[row].clone(),
            document: self.documents[row].clone(),
            metadata: self.metadatas[row].clone(),
            distance: self.distances[row],
            confidence: self.confidences[row],
        })
    }
}

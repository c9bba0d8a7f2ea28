//! Similarity index over previously classified documents.
//!
//! The index stores OCR text with its metadata (notably `document_type`) and answers
//! nearest-neighbour queries with a distance and a normalized confidence. Backends implement
//! [`SimilarityIndex`]; [`create_similarity_index`] selects one from the configuration.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::{Config, IndexBackend};
use crate::embedding::EmbeddingClient;

pub mod memory;
pub mod qdrant;
pub mod types;

pub use memory::InMemoryIndex;
pub use qdrant::QdrantIndex;
pub use types::{IndexError, IndexHandle, QueryResult, SimilarityMatch};

/// Collection used when callers do not name one.
pub const DEFAULT_COLLECTION: &str = "idu_collection";
/// Neighbours returned by a query unless the caller asks otherwise.
pub const DEFAULT_QUERY_LIMIT: usize = 10;

/// Steepness of the distance-to-confidence sigmoid.
const CONFIDENCE_STEEPNESS: f64 = 5.0;
/// Distance at which confidence is exactly one half.
const CONFIDENCE_MIDPOINT: f64 = 1.0;

/// Interface implemented by similarity index backends.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Backend identifier used in logs.
    fn backend(&self) -> &'static str;

    /// Open `name`, creating it if missing, and make it the active collection.
    ///
    /// `embedder` overrides the backend's default embedding client; `metadata` defaults to
    /// [`default_collection_metadata`].
    async fn get_or_create_index(
        &self,
        name: &str,
        embedder: Option<Arc<dyn EmbeddingClient>>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<IndexHandle, IndexError>;

    /// Store documents with their metadata. Missing ids are generated as random UUIDs.
    async fn add(
        &self,
        documents: Vec<String>,
        metadatas: Vec<Map<String, Value>>,
        ids: Option<Vec<String>>,
    ) -> Result<(), IndexError>;

    /// Return up to `limit` nearest neighbours of `text`, nearest first.
    async fn query(&self, text: &str, limit: usize) -> Result<QueryResult, IndexError>;
}

/// Map a cosine distance to a confidence in `[0, 1]`, rounded to three decimals.
///
/// Strictly decreasing in `distance`; `distance_to_confidence(1.0) == 0.5`.
pub fn distance_to_confidence(distance: f64) -> f64 {
    let raw = 1.0 / (1.0 + (CONFIDENCE_STEEPNESS * (distance - CONFIDENCE_MIDPOINT)).exp());
    (raw * 1000.0).round() / 1000.0
}

/// Metadata attached to collections created without explicit metadata.
pub fn default_collection_metadata() -> Map<String, Value> {
    let created = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string());
    let mut metadata = Map::new();
    metadata.insert(
        "description".into(),
        Value::String("Collection for IDU API".into()),
    );
    metadata.insert("created".into(), Value::String(created));
    metadata
}

/// Validate list lengths for `add` and fill in missing ids.
pub(crate) fn resolve_ids(
    documents: &[String],
    metadatas: &[Map<String, Value>],
    ids: Option<Vec<String>>,
) -> Result<Vec<String>, IndexError> {
    if metadatas.len() != documents.len() {
        return Err(IndexError::LengthMismatch {
            documents: documents.len(),
            metadatas: metadatas.len(),
        });
    }
    match ids {
        Some(ids) if ids.len() != documents.len() => Err(IndexError::IdCountMismatch {
            documents: documents.len(),
            ids: ids.len(),
        }),
        Some(ids) => Ok(ids),
        None => Ok(documents
            .iter()
            .map(|_| uuid::Uuid::new_v4().to_string())
            .collect()),
    }
}

/// Build the index backend selected by `config`, embedding with `embedder` by default.
pub fn create_similarity_index(
    config: &Config,
    embedder: Arc<dyn EmbeddingClient>,
) -> Result<Arc<dyn SimilarityIndex>, IndexError> {
    let index: Arc<dyn SimilarityIndex> = match config.vector_backend {
        IndexBackend::Memory => Arc::new(InMemoryIndex::new(embedder)),
        IndexBackend::Qdrant => {
            let url = config
                .qdrant_url
                .as_deref()
                .ok_or_else(|| IndexError::InvalidUrl("QDRANT_URL is not set".into()))?;
            Arc::new(QdrantIndex::new(
                url,
                config.qdrant_api_key.clone(),
                embedder,
            )?)
        }
    };
    tracing::debug!(backend = index.backend(), "Similarity index ready");
    Ok(index)
}

/// Build the configured backend and activate `config.collection_name`, creating it if needed.
pub async fn open_configured_index(config: &Config) -> Result<Arc<dyn SimilarityIndex>, IndexError> {
    let embedder = crate::embedding::create_embedding_client(config)?;
    let index = create_similarity_index(config, embedder)?;
    let handle = index
        .get_or_create_index(&config.collection_name, None, None)
        .await?;
    tracing::info!(
        backend = index.backend(),
        collection = handle.name(),
        dimension = handle.dimension(),
        "Similarity index opened"
    );
    Ok(index)
}

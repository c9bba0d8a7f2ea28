//! Process-local similarity index using cosine distance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{
    IndexError, IndexHandle, QueryResult, SimilarityIndex, SimilarityMatch,
    default_collection_metadata, distance_to_confidence, resolve_ids,
};
use crate::embedding::EmbeddingClient;

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    document: String,
    metadata: Map<String, Value>,
    vector: Vec<f32>,
}

#[derive(Debug, Default)]
struct Collection {
    metadata: Map<String, Value>,
    documents: Vec<StoredDocument>,
}

/// In-memory index keyed by collection name. Re-adding an id replaces the stored document.
pub struct InMemoryIndex {
    default_embedder: Arc<dyn EmbeddingClient>,
    collections: RwLock<HashMap<String, Collection>>,
    active: RwLock<Option<IndexHandle>>,
}

impl InMemoryIndex {
    /// Create an empty index embedding with `default_embedder` unless overridden per collection.
    pub fn new(default_embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self {
            default_embedder,
            collections: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
        }
    }

    /// Number of documents stored in `collection`.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, |stored| stored.documents.len())
    }

    async fn active_handle(&self) -> Result<IndexHandle, IndexError> {
        self.active
            .read()
            .await
            .clone()
            .ok_or(IndexError::Uninitialized)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl SimilarityIndex for InMemoryIndex {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get_or_create_index(
        &self,
        name: &str,
        embedder: Option<Arc<dyn EmbeddingClient>>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<IndexHandle, IndexError> {
        let embedder = embedder.unwrap_or_else(|| Arc::clone(&self.default_embedder));
        let metadata = {
            let mut collections = self.collections.write().await;
            let collection = collections.entry(name.to_string()).or_insert_with(|| {
                tracing::debug!(collection = name, "Creating in-memory collection");
                Collection {
                    metadata: metadata.unwrap_or_else(default_collection_metadata),
                    documents: Vec::new(),
                }
            });
            collection.metadata.clone()
        };

        let handle = IndexHandle {
            name: name.to_string(),
            metadata,
            embedder,
        };
        *self.active.write().await = Some(handle.clone());
        Ok(handle)
    }

    async fn add(
        &self,
        documents: Vec<String>,
        metadatas: Vec<Map<String, Value>>,
        ids: Option<Vec<String>>,
    ) -> Result<(), IndexError> {
        let handle = self.active_handle().await?;
        let ids = resolve_ids(&documents, &metadatas, ids)?;
        if documents.is_empty() {
            return Ok(());
        }

        let vectors = handle.embedder.generate_embeddings(documents.clone()).await?;
        let mut collections = self.collections.write().await;
        let collection = collections.entry(handle.name.clone()).or_default();
        let count = documents.len();
        for (((id, document), metadata), vector) in ids
            .into_iter()
            .zip(documents)
            .zip(metadatas)
            .zip(vectors)
        {
            let stored = StoredDocument {
                id,
                document,
                metadata,
                vector,
            };
            match collection
                .documents
                .iter_mut()
                .find(|existing| existing.id == stored.id)
            {
                Some(existing) => *existing = stored,
                None => collection.documents.push(stored),
            }
        }
        tracing::debug!(collection = %handle.name, documents = count, "Documents indexed");
        Ok(())
    }

    async fn query(&self, text: &str, limit: usize) -> Result<QueryResult, IndexError> {
        let handle = self.active_handle().await?;
        let query_vector = handle
            .embedder
            .generate_embeddings(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::InvalidResponse("no query embedding returned".into()))?;

        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&handle.name) else {
            return Ok(QueryResult::default());
        };

        let mut matches: Vec<SimilarityMatch> = collection
            .documents
            .iter()
            .map(|stored| {
                let distance = f64::from(1.0 - cosine_similarity(&stored.vector, &query_vector));
                SimilarityMatch {
                    id: stored.id.clone(),
                    document: stored.document.clone(),
                    metadata: stored.metadata.clone(),
                    distance,
                    confidence: distance_to_confidence(distance),
                }
            })
            .collect();
        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit);
        Ok(QueryResult::from_matches(matches))
    }
}

//! Qdrant-backed similarity index over the HTTP API.
//!
//! Each document becomes one point whose payload carries the caller-visible id, the document
//! text, and the metadata map. Qdrant only accepts UUID or integer point ids, so caller ids that
//! are not UUIDs are kept in the payload and the point gets a fresh UUID.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;

use super::{
    IndexError, IndexHandle, QueryResult, SimilarityIndex, SimilarityMatch,
    default_collection_metadata, distance_to_confidence, resolve_ids,
};
use crate::embedding::EmbeddingClient;

const PAYLOAD_ID: &str = "doc_id";
const PAYLOAD_DOCUMENT: &str = "document";
const PAYLOAD_METADATA: &str = "metadata";

/// Similarity index stored in a Qdrant collection (cosine distance).
pub struct QdrantIndex {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    default_embedder: Arc<dyn EmbeddingClient>,
    active: RwLock<Option<IndexHandle>>,
}

#[derive(Deserialize)]
struct QueryResponse {
    result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
struct QueryPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

impl QdrantIndex {
    /// Construct a client for the Qdrant instance at `url`.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        default_embedder: Arc<dyn EmbeddingClient>,
    ) -> Result<Self, IndexError> {
        let client = Client::builder().user_agent("rustyidu/0.1").build()?;
        let base_url = normalize_base_url(url).map_err(IndexError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            api_key,
            default_embedder,
            active: RwLock::new(None),
        })
    }

    async fn active_handle(&self) -> Result<IndexHandle, IndexError> {
        self.active
            .read()
            .await
            .clone()
            .ok_or(IndexError::Uninitialized)
    }

    async fn collection_exists(&self, collection_name: &str) -> Result<bool, IndexError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection_name}"))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = IndexError::UnexpectedStatus { status, body };
                tracing::error!(collection = collection_name, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    async fn create_collection(
        &self,
        collection_name: &str,
        vector_size: usize,
    ) -> Result<(), IndexError> {
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection_name}"))
            .json(&body)
            .send()
            .await?;

        ensure_success(response, || {
            tracing::info!(collection = collection_name, vector_size, "Collection created");
        })
        .await
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }
}

#[async_trait]
impl SimilarityIndex for QdrantIndex {
    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn get_or_create_index(
        &self,
        name: &str,
        embedder: Option<Arc<dyn EmbeddingClient>>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<IndexHandle, IndexError> {
        let embedder = embedder.unwrap_or_else(|| Arc::clone(&self.default_embedder));
        let metadata = metadata.unwrap_or_else(default_collection_metadata);

        if !self.collection_exists(name).await? {
            self.create_collection(name, embedder.dimension()).await?;
        }
        tracing::debug!(collection = name, metadata = ?metadata, "Collection ready");

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
        let points: Vec<Value> = ids
            .into_iter()
            .zip(documents)
            .zip(metadatas)
            .zip(vectors)
            .map(|(((id, document), metadata), vector)| {
                json!({
                    "id": point_id(&id),
                    "vector": vector,
                    "payload": {
                        PAYLOAD_ID: id,
                        PAYLOAD_DOCUMENT: document,
                        PAYLOAD_METADATA: metadata,
                    },
                })
            })
            .collect();

        let point_count = points.len();
        let response = self
            .request(Method::PUT, &format!("collections/{}/points", handle.name))
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        ensure_success(response, || {
            tracing::debug!(
                collection = %handle.name,
                points = point_count,
                "Points indexed"
            );
        })
        .await
    }

    async fn query(&self, text: &str, limit: usize) -> Result<QueryResult, IndexError> {
        let handle = self.active_handle().await?;
        let vector = handle
            .embedder
            .generate_embeddings(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::InvalidResponse("no query embedding returned".into()))?;

        let body = json!({
            "query": vector,
            "limit": limit,
            "with_payload": true,
        });
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", handle.name),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = IndexError::UnexpectedStatus { status, body };
            tracing::error!(collection = %handle.name, error = %error, "Qdrant query failed");
            return Err(error);
        }

        let payload: QueryResponse = response
            .json()
            .await
            .map_err(|error| IndexError::InvalidResponse(error.to_string()))?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        let matches = points.into_iter().map(into_match).collect();
        Ok(QueryResult::from_matches(matches))
    }
}

fn into_match(point: QueryPoint) -> SimilarityMatch {
    let mut payload = point.payload.unwrap_or_default();
    let id = match payload.remove(PAYLOAD_ID) {
        Some(Value::String(id)) => id,
        _ => stringify_point_id(point.id),
    };
    let document = match payload.remove(PAYLOAD_DOCUMENT) {
        Some(Value::String(document)) => document,
        _ => String::new(),
    };
    let metadata = match payload.remove(PAYLOAD_METADATA) {
        Some(Value::Object(metadata)) => metadata,
        _ => Map::new(),
    };
    let distance = 1.0 - f64::from(point.score);
    SimilarityMatch {
        id,
        document,
        metadata,
        distance,
        confidence: distance_to_confidence(distance),
    }
}

/// Qdrant only accepts UUID or integer point ids; other caller ids map to a stable v5 UUID.
fn point_id(id: &str) -> String {
    match uuid::Uuid::parse_str(id) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, id.as_bytes()).to_string(),
    }
}

async fn ensure_success<F>(response: reqwest::Response, on_success: F) -> Result<(), IndexError>
where
    F: FnOnce(),
{
    if response.status().is_success() {
        on_success();
        Ok(())
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let error = IndexError::UnexpectedStatus { status, body };
        tracing::error!(error = %error, "Qdrant request failed");
        Err(error)
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

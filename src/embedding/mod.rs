//! Text embedding backends used by the similarity index.
//!
//! Every backend implements [`EmbeddingClient`]; [`create_embedding_client`] picks one from the
//! configured [`EmbeddingProvider`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{Config, EmbeddingProvider, get_config};

mod ollama;
mod openai;

pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;

pub(crate) const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider could not be reached.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider answered with a body that does not match the expected shape.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Provider settings are incomplete.
    #[error("Embedding provider misconfigured: {0}")]
    Configuration(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Length of every vector this client returns.
    fn dimension(&self) -> usize;
}

/// Deterministic embedder that folds UTF-8 bytes into a normalized vector.
///
/// Needs no network access, which makes it the backend of choice for offline runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct HashedEmbeddingClient {
    dimension: usize,
}

impl HashedEmbeddingClient {
    /// Construct an embedder producing `dimension`-length vectors.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            // Mix the position in so anagrams do not collide.
            let slot = (idx.wrapping_mul(31) ^ usize::from(byte)) % dimension;
            embedding[slot] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashedEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        tracing::debug!(
            provider = "hashed",
            dimension = self.dimension,
            texts = texts.len(),
            "Generating embeddings"
        );

        Ok(texts
            .iter()
            .map(|text| Self::encode(text, self.dimension))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Reject responses whose shape disagrees with the request.
pub(crate) fn check_vectors(
    provider: &str,
    expected_count: usize,
    dimension: usize,
    vectors: &[Vec<f32>],
) -> Result<(), EmbeddingClientError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingClientError::InvalidResponse(format!(
            "{provider} returned {} vectors for {expected_count} texts",
            vectors.len()
        )));
    }
    if let Some(vector) = vectors.iter().find(|vector| vector.len() != dimension) {
        return Err(EmbeddingClientError::InvalidResponse(format!(
            "{provider} returned a {}-dimensional vector, expected {dimension}",
            vector.len()
        )));
    }
    Ok(())
}

/// Build the embedding client selected by `config`.
pub fn create_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    let dimension = config.embedding_dimension;
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Hashed => Arc::new(HashedEmbeddingClient::new(dimension)),
        EmbeddingProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                EmbeddingClientError::Configuration("OPENAI_API_KEY is not set".into())
            })?;
            Arc::new(OpenAiEmbeddingClient::new(
                api_key,
                config.embedding_model.clone(),
                dimension,
            )?)
        }
        EmbeddingProvider::Ollama => {
            let base_url = config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
            Arc::new(OllamaEmbeddingClient::new(
                base_url,
                config.embedding_model.clone(),
                dimension,
            )?)
        }
    };
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension,
        "Embedding client ready"
    );
    Ok(client)
}

/// Build an embedding client from the global configuration.
pub fn get_embedding_client() -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    create_embedding_client(get_config())
}

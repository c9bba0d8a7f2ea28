use std::env;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_COLLECTION_NAME: &str = "idu_collection";
const DEFAULT_OCR_MODEL: &str = "tgi";
const DEFAULT_TESSERACT_BIN: &str = "tesseract";
const DEFAULT_TESSERACT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_OLLAMA_COMPLETION_MODEL: &str = "llama3.1";
const DEFAULT_COMPLETION_TEMPERATURE: f32 = 0.1;
const DEFAULT_COMPLETION_MAX_TOKENS: u32 = 2000;
const DEFAULT_OCR_UNAVAILABLE_WAIT_SECS: u64 = 180;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the extraction pipeline and its backends.
#[derive(Debug, Clone)]
pub struct Config {
    /// OCR engine used by the pipeline and the ingestion flow.
    pub ocr_engine: OcrEngineKind,
    /// Base URL of the chat-completions endpoint serving the OCR model.
    pub ocr_endpoint_url: Option<String>,
    /// Bearer token for the OCR endpoint.
    pub ocr_api_key: Option<String>,
    /// Model identifier sent to the OCR endpoint.
    pub ocr_model: String,
    /// Prime the remote OCR model with text produced by the local engine.
    pub ocr_anchor: bool,
    /// Fixed wait between attempts while the OCR endpoint is unavailable.
    pub ocr_unavailable_wait_secs: u64,
    /// Path or name of the Tesseract executable.
    pub tesseract_bin: String,
    /// Seconds a single Tesseract run may take before it is killed.
    pub tesseract_timeout_secs: u64,
    /// Similarity index backend.
    pub vector_backend: IndexBackend,
    /// Base URL of the Qdrant instance.
    pub qdrant_url: Option<String>,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Name of the collection holding previously classified documents.
    pub collection_name: String,
    /// Embedding provider used by the similarity index.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// API key for OpenAI embeddings.
    pub openai_api_key: Option<String>,
    /// Base URL of a local Ollama runtime.
    pub ollama_url: Option<String>,
    /// Language-model provider used for type validation and extraction.
    pub completion_provider: CompletionProvider,
    /// Completion model identifier.
    pub completion_model: String,
    /// API key for the Anthropic Messages API.
    pub anthropic_api_key: Option<String>,
    /// Sampling temperature for completions.
    pub completion_temperature: f32,
    /// Upper bound on generated tokens per completion.
    pub completion_max_tokens: u32,
}

/// Supported OCR engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OcrEngineKind {
    /// Local Tesseract executable (blocking only).
    Tesseract,
    /// olmOCR model served behind an OpenAI-compatible endpoint.
    OlmoOcr,
}

/// Supported similarity index backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexBackend {
    /// Qdrant over its HTTP API.
    Qdrant,
    /// Process-local cosine index.
    Memory,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Deterministic byte-hashing embedder that needs no network.
    Hashed,
}

/// Supported completion backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionProvider {
    /// Anthropic Messages API.
    Anthropic,
    /// Local Ollama runtime.
    Ollama,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let ocr_engine = vars.parsed_or("OCR_ENGINE", OcrEngineKind::OlmoOcr)?;
        let ocr_endpoint_url = vars.optional("OCR_ENDPOINT_URL");
        if ocr_engine == OcrEngineKind::OlmoOcr && ocr_endpoint_url.is_none() {
            return Err(ConfigError::MissingVariable("OCR_ENDPOINT_URL".into()));
        }

        let vector_backend = vars.parsed_or("VECTOR_BACKEND", IndexBackend::Qdrant)?;
        let qdrant_url = vars.optional("QDRANT_URL");
        if vector_backend == IndexBackend::Qdrant && qdrant_url.is_none() {
            return Err(ConfigError::MissingVariable("QDRANT_URL".into()));
        }

        let embedding_provider = vars.parsed_or("EMBEDDING_PROVIDER", EmbeddingProvider::OpenAI)?;
        let openai_api_key = vars.optional("OPENAI_API_KEY");
        if embedding_provider == EmbeddingProvider::OpenAI && openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".into()));
        }

        let completion_provider =
            vars.parsed_or("COMPLETION_PROVIDER", CompletionProvider::Anthropic)?;
        let anthropic_api_key = vars.optional("ANTHROPIC_API_KEY");
        if completion_provider == CompletionProvider::Anthropic && anthropic_api_key.is_none() {
            return Err(ConfigError::MissingVariable("ANTHROPIC_API_KEY".into()));
        }
        let completion_model = vars.optional("COMPLETION_MODEL").unwrap_or_else(|| {
            match completion_provider {
                CompletionProvider::Anthropic => DEFAULT_ANTHROPIC_MODEL,
                CompletionProvider::Ollama => DEFAULT_OLLAMA_COMPLETION_MODEL,
            }
            .to_string()
        });

        Ok(Self {
            ocr_engine,
            ocr_endpoint_url,
            ocr_api_key: vars.optional("OCR_API_KEY"),
            ocr_model: vars
                .optional("OCR_MODEL")
                .unwrap_or_else(|| DEFAULT_OCR_MODEL.to_string()),
            ocr_anchor: vars.parsed_or("OCR_ANCHOR", false)?,
            ocr_unavailable_wait_secs: vars
                .parsed_or("OCR_UNAVAILABLE_WAIT_SECS", DEFAULT_OCR_UNAVAILABLE_WAIT_SECS)?,
            tesseract_bin: vars
                .optional("TESSERACT_BIN")
                .unwrap_or_else(|| DEFAULT_TESSERACT_BIN.to_string()),
            tesseract_timeout_secs: vars
                .parsed_or("TESSERACT_TIMEOUT_SECS", DEFAULT_TESSERACT_TIMEOUT_SECS)?,
            vector_backend,
            qdrant_url,
            qdrant_api_key: vars.optional("QDRANT_API_KEY"),
            collection_name: vars
                .optional("COLLECTION_NAME")
                .unwrap_or_else(|| DEFAULT_COLLECTION_NAME.to_string()),
            embedding_provider,
            embedding_model: vars
                .optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dimension: vars
                .parsed_or("EMBEDDING_DIMENSION", DEFAULT_EMBEDDING_DIMENSION)?,
            openai_api_key,
            ollama_url: vars.optional("OLLAMA_URL"),
            completion_provider,
            completion_model,
            anthropic_api_key,
            completion_temperature: vars
                .parsed_or("COMPLETION_TEMPERATURE", DEFAULT_COMPLETION_TEMPERATURE)?,
            completion_max_tokens: vars
                .parsed_or("COMPLETION_MAX_TOKENS", DEFAULT_COMPLETION_MAX_TOKENS)?,
        })
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn parsed_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string())),
            None => Ok(default),
        }
    }
}

impl std::str::FromStr for OcrEngineKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tesseract" => Ok(Self::Tesseract),
            "olmo_ocr" | "olmocr" => Ok(Self::OlmoOcr),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for IndexBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" | "in_memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hashed" => Ok(Self::Hashed),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for CompletionProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        ocr_engine = ?config.ocr_engine,
        vector_backend = ?config.vector_backend,
        collection = %config.collection_name,
        embedding_provider = ?config.embedding_provider,
        completion_provider = ?config.completion_provider,
        completion_model = %config.completion_model,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const MINIMAL: &[(&str, &str)] = &[
        ("OCR_ENDPOINT_URL", "http://ocr.local/v1"),
        ("QDRANT_URL", "http://127.0.0.1:6333"),
        ("OPENAI_API_KEY", "sk-test"),
        ("ANTHROPIC_API_KEY", "ak-test"),
    ];

    #[test]
    fn minimal_environment_applies_defaults() {
        let config = Config::from_lookup(lookup(MINIMAL)).expect("config");
        assert_eq!(config.ocr_engine, OcrEngineKind::OlmoOcr);
        assert_eq!(config.vector_backend, IndexBackend::Qdrant);
        assert_eq!(config.collection_name, "idu_collection");
        assert_eq!(config.ocr_model, "tgi");
        assert_eq!(config.ocr_unavailable_wait_secs, 180);
        assert_eq!(config.tesseract_timeout_secs, 5);
        assert!(!config.ocr_anchor);
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert_eq!(config.completion_max_tokens, 2000);
        assert!((config.completion_temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn remote_ocr_requires_endpoint() {
        let error = Config::from_lookup(lookup(&[
            ("QDRANT_URL", "http://127.0.0.1:6333"),
            ("OPENAI_API_KEY", "sk-test"),
            ("ANTHROPIC_API_KEY", "ak-test"),
        ]))
        .expect_err("endpoint required");
        assert!(matches!(error, ConfigError::MissingVariable(key) if key == "OCR_ENDPOINT_URL"));
    }

    #[test]
    fn local_backends_need_no_credentials() {
        let config = Config::from_lookup(lookup(&[
            ("OCR_ENGINE", "tesseract"),
            ("VECTOR_BACKEND", "memory"),
            ("EMBEDDING_PROVIDER", "hashed"),
            ("COMPLETION_PROVIDER", "ollama"),
            ("TESSERACT_TIMEOUT_SECS", "12"),
        ]))
        .expect("config");
        assert_eq!(config.ocr_engine, OcrEngineKind::Tesseract);
        assert_eq!(config.tesseract_timeout_secs, 12);
        assert_eq!(config.completion_model, "llama3.1");
    }

    #[test]
    fn invalid_values_are_reported_by_key() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("EMBEDDING_DIMENSION", "wide"));
        let error = Config::from_lookup(lookup(&pairs)).expect_err("invalid dimension");
        assert!(matches!(error, ConfigError::InvalidValue(key) if key == "EMBEDDING_DIMENSION"));

        let mut pairs = MINIMAL.to_vec();
        pairs.push(("OCR_ENGINE", "abbyy"));
        let error = Config::from_lookup(lookup(&pairs)).expect_err("invalid engine");
        assert!(matches!(error, ConfigError::InvalidValue(key) if key == "OCR_ENGINE"));
    }
}

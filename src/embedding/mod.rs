//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]** — calls any OpenAI-compatible `/embeddings` endpoint
//!   (LM Studio, vLLM, OpenAI itself) with retry and backoff.
//! - **[`OllamaProvider`]** — calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalProvider`** — runs models in-process via fastembed (feature
//!   `local-embeddings-fastembed`); no network calls after model download.
//!
//! Every provider prefixes the text with its [`Purpose`] before embedding
//! (`"search_query: ..."`), the convention used by nomic-style models to
//! separate questions from indexed passages. Vectors produced under different
//! purposes or models are not comparable.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`] — compute similarity between two embedding vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`] — decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust,no_run
//! # use handbook_assistant::config::EmbeddingConfig;
//! # use handbook_assistant::embedding::create_provider;
//! let mut config = EmbeddingConfig::default();
//! config.provider = "disabled".to_string();
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::EmbeddingConfig;
use crate::error::{AssistantError, Result};
use crate::http::{self, JsonEndpoint};

/// What an embedding will be compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    SearchQuery,
    SearchDocument,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::SearchQuery => "search_query",
            Purpose::SearchDocument => "search_document",
        }
    }

    /// The text actually sent to the model.
    pub fn prefix(&self, text: &str) -> String {
        format!("{}: {}", self.as_str(), text)
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for embedding providers.
///
/// Implementations must be deterministic for identical
/// `(text, purpose, model)` and return vectors of constant length.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text-v1.5"`).
    fn model_name(&self) -> &str;

    /// Returns the expected dimensionality, if known up front.
    fn dims(&self) -> Option<usize> {
        None
    }

    /// Embed one text for the given purpose.
    async fn embed(&self, text: &str, purpose: Purpose) -> Result<Vec<f32>>;
}

/// Reject vectors whose length disagrees with the configured dimensionality.
fn check_dims(provider: &str, expected: Option<usize>, vector: Vec<f32>) -> Result<Vec<f32>> {
    match expected {
        Some(d) if d != vector.len() => Err(AssistantError::provider(
            provider,
            format!("expected {}-dimensional embedding, got {}", d, vector.len()),
        )),
        _ if vector.is_empty() => Err(AssistantError::provider(provider, "empty embedding")),
        _ => Ok(vector),
    }
}

fn json_to_vec(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()
        .map(|arr| arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _text: &str, _purpose: Purpose) -> Result<Vec<f32>> {
        Err(AssistantError::provider(
            "embedding",
            "embedding provider is disabled",
        ))
    }
}

// ============ OpenAI-compatible Provider ============

/// Embedding provider for OpenAI-compatible servers.
///
/// Calls `POST {url}/embeddings`. The default URL targets a local LM Studio
/// server; the API key is optional and read from `api_key_env`.
pub struct OpenAIProvider {
    model: String,
    dims: Option<usize>,
    url: String,
    api_key: Option<String>,
    max_retries: u32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:1234/v1".to_string());
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            url: url.trim_end_matches('/').to_string(),
            api_key: http::api_key_from_env(&config.api_key_env),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, text: &str, purpose: Purpose) -> Result<Vec<f32>> {
        let endpoint = JsonEndpoint {
            provider: "openai",
            url: format!("{}/embeddings", self.url),
            api_key: self.api_key.as_deref(),
            max_retries: self.max_retries,
            timeout_secs: self.timeout_secs,
        };
        let body = json!({
            "model": self.model,
            "input": [purpose.prefix(text)],
        });
        let response = endpoint.post(&self.client, &body).await?;
        let vector = parse_openai_response(&response)?;
        check_dims("openai", self.dims(), vector)
    }
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    json.get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(json_to_vec)
        .ok_or_else(|| {
            AssistantError::provider("openai", "invalid response: missing data[0].embedding")
        })
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: Option<usize>,
    url: String,
    max_retries: u32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, text: &str, purpose: Purpose) -> Result<Vec<f32>> {
        let endpoint = JsonEndpoint {
            provider: "ollama",
            url: format!("{}/api/embed", self.url),
            api_key: None,
            max_retries: self.max_retries,
            timeout_secs: self.timeout_secs,
        };
        let body = json!({
            "model": self.model,
            "input": [purpose.prefix(text)],
        });
        let response = endpoint.post(&self.client, &body).await?;
        let vector = response
            .get("embeddings")
            .and_then(|e| e.as_array())
            .and_then(|e| e.first())
            .and_then(json_to_vec)
            .ok_or_else(|| {
                AssistantError::provider("ollama", "invalid response: missing embeddings array")
            })?;
        check_dims("ollama", self.dims(), vector)
    }
}

// ============ Local Provider (fastembed) ============

/// Embedding provider for in-process inference via fastembed.
///
/// The model is downloaded from Hugging Face on first use and kept loaded
/// for the lifetime of the provider.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: Option<usize>,
    fastembed_model: fastembed::EmbeddingModel,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let fastembed_model = config_to_fastembed_model(&config.model)?;
        Ok(Self {
            model_name: config.model.clone(),
            dims: config.dims,
            fastembed_model,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => Err(AssistantError::Config(format!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, text: &str, purpose: Purpose) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let fastembed_model = self.fastembed_model.clone();
        let input = purpose.prefix(text);

        let vector = tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
            let mut guard = model
                .lock()
                .map_err(|_| AssistantError::provider("local", "model lock poisoned"))?;
            if guard.is_none() {
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
                )
                .map_err(|e| {
                    AssistantError::provider("local", format!("failed to initialize model: {}", e))
                })?;
                *guard = Some(loaded);
            }
            let embedder = guard
                .as_mut()
                .ok_or_else(|| AssistantError::provider("local", "model not loaded"))?;
            let mut embeddings = embedder
                .embed(vec![input], None)
                .map_err(|e| AssistantError::provider("local", format!("embedding failed: {}", e)))?;
            embeddings
                .pop()
                .ok_or_else(|| AssistantError::provider("local", "empty embedding response"))
        })
        .await
        .map_err(|e| AssistantError::Other(e.into()))??;

        check_dims("local", self.dims(), vector)
    }
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (feature `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(AssistantError::Config(
            "Local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(AssistantError::Config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use handbook_assistant::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`. A zero-norm vector scores exactly `0.0`
/// against anything, as do empty vectors, vectors of different lengths, and
/// vectors with non-finite components.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    // Infinite components produce NaN.
    if similarity.is_nan() {
        0.0
    } else {
        similarity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purpose_prefix() {
        assert_eq!(
            Purpose::SearchQuery.prefix("tardy policy"),
            "search_query: tardy policy"
        );
        assert_eq!(
            Purpose::SearchDocument.prefix("x"),
            "search_document: x"
        );
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_exactly_zero() {
        let zero = vec![0.0, 0.0, 0.0];
        let v = vec![0.3, -1.0, 2.0];
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
        assert_eq!(cosine_similarity(&v, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_infinite_component_is_zero() {
        let v = vec![f32::INFINITY, 1.0];
        assert_eq!(cosine_similarity(&v, &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 1.0], &v), 0.0);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_parse_openai_response() {
        let json = json!({"data": [{"embedding": [0.5, -0.25]}]});
        assert_eq!(parse_openai_response(&json).unwrap(), vec![0.5, -0.25]);

        let bad = json!({"data": []});
        assert!(parse_openai_response(&bad).is_err());
    }

    #[test]
    fn test_check_dims() {
        assert!(check_dims("t", Some(2), vec![1.0, 2.0]).is_ok());
        assert!(check_dims("t", Some(3), vec![1.0, 2.0]).is_err());
        assert!(check_dims("t", None, vec![]).is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let err = DisabledProvider
            .embed("hello", Purpose::SearchQuery)
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::ProviderUnavailable { .. }));
    }
}

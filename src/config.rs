//! TOML configuration parsing and validation.
//!
//! Every section has defaults, so an empty file is a valid configuration that
//! talks to an OpenAI-compatible server on `localhost:1234` (LM Studio) and
//! stores passages in a local SQLite file.
//!
//! ```toml
//! [assistant]
//! name = "Emma"
//!
//! [generation]
//! provider = "openai"
//! model = "gemma-3-4b-it-qat"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-nomic-embed-text-v1.5"
//!
//! [store]
//! backend = "sqlite"
//! path = "./data/handbook.sqlite"
//!
//! [retrieval]
//! n_results = 11
//! history_aware = true
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::prompt::Persona;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub keywords: KeywordsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Persona shown to users and embedded in every answer prompt.
#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    #[serde(default = "default_assistant_name")]
    pub name: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_description")]
    pub description: String,
    /// Identity statement placed at the top of the answer prompt.
    /// Derived from `name` when absent.
    #[serde(default)]
    pub full_description: Option<String>,
    /// Deployment-specific rules appended to the general instructions.
    #[serde(default)]
    pub additional_prompt: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: default_assistant_name(),
            title: default_title(),
            description: default_description(),
            full_description: None,
            additional_prompt: None,
        }
    }
}

fn default_assistant_name() -> String {
    "Emma".to_string()
}
fn default_title() -> String {
    "Handbook Assistant".to_string()
}
fn default_description() -> String {
    "AI assistant for the university student handbook.".to_string()
}

impl AssistantConfig {
    pub fn to_persona(&self) -> Persona {
        let full_description = self.full_description.clone().unwrap_or_else(|| {
            format!(
                "My name is {}. I am an AI assistant for students of the University. \
                 My sole purpose is to provide accurate information based *only* on the \
                 official student handbook content provided to me.",
                self.name
            )
        });
        Persona {
            name: self.name.clone(),
            full_description,
            additional_prompt: self.additional_prompt.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Base URL of the provider API. Defaults per provider.
    #[serde(default)]
    pub url: Option<String>,
    /// Name of the environment variable holding the API key, if any.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_generation_model(),
            url: None,
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_generation_model() -> String {
    "gemma-3-4b-it-qat".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Expected dimensionality; responses of another length are rejected.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-nomic-embed-text-v1.5".to_string()
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `memory`, `sqlite`, or `chroma`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// SQLite database file (sqlite backend).
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Chroma server URL (chroma backend).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
            url: None,
            collection: default_collection(),
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/handbook.sqlite")
}
fn default_collection() -> String {
    "documents".to_string()
}
fn default_store_timeout_secs() -> u64 {
    10
}

/// Which embedding a retrieved passage is scored with during re-ranking.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RerankMode {
    /// The embedding of the query that first retrieved the passage.
    #[default]
    Query,
    /// The passage's own embedding when the store returns one.
    Document,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Passages requested from the store per query phrasing.
    #[serde(default = "default_n_results")]
    pub n_results: usize,
    /// Feed chat history into query rewriting and the answer prompt.
    #[serde(default = "default_true")]
    pub history_aware: bool,
    #[serde(default = "default_alternative_temperature")]
    pub alternative_temperature: f32,
    #[serde(default = "default_answer_temperature")]
    pub answer_temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Restrict store queries to passages tagged with an extracted keyword.
    #[serde(default = "default_true")]
    pub keyword_filter: bool,
    #[serde(default)]
    pub rerank: RerankMode,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            n_results: default_n_results(),
            history_aware: true,
            alternative_temperature: default_alternative_temperature(),
            answer_temperature: default_answer_temperature(),
            max_tokens: None,
            keyword_filter: true,
            rerank: RerankMode::Query,
        }
    }
}

fn default_n_results() -> usize {
    11
}
fn default_true() -> bool {
    true
}
fn default_alternative_temperature() -> f32 {
    0.2
}
fn default_answer_temperature() -> f32 {
    0.55
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeywordsConfig {
    /// `rules` (built-in tagger) or `none` (no linguistic model).
    #[serde(default = "default_tagger")]
    pub tagger: String,
    #[serde(default = "default_true")]
    pub use_fallback: bool,
    #[serde(default = "default_true")]
    pub include_verb: bool,
    /// Also extract keywords from the generated alternative queries.
    #[serde(default = "default_true")]
    pub from_alternatives: bool,
}

impl Default for KeywordsConfig {
    fn default() -> Self {
        Self {
            tagger: default_tagger(),
            use_fallback: true,
            include_verb: true,
            from_alternatives: true,
        }
    }
}

fn default_tagger() -> String {
    "rules".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.generation.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0 when set");
    }

    match config.store.backend.as_str() {
        "memory" | "sqlite" => {}
        "chroma" => {
            if config.store.url.is_none() {
                anyhow::bail!("store.url must be specified when backend is 'chroma'");
            }
        }
        other => anyhow::bail!(
            "Unknown store backend: '{}'. Must be memory, sqlite, or chroma.",
            other
        ),
    }

    if config.retrieval.n_results == 0 {
        anyhow::bail!("retrieval.n_results must be >= 1");
    }

    if config.store.timeout_secs == 0 {
        anyhow::bail!("store.timeout_secs must be >= 1");
    }

    for (name, t) in [
        ("alternative_temperature", config.retrieval.alternative_temperature),
        ("answer_temperature", config.retrieval.answer_temperature),
    ] {
        if !(0.0..=2.0).contains(&t) {
            anyhow::bail!("retrieval.{} must be in [0.0, 2.0]", name);
        }
    }

    match config.keywords.tagger.as_str() {
        "rules" | "none" => {}
        other => anyhow::bail!("Unknown keyword tagger: '{}'. Must be rules or none.", other),
    }

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    Ok(())
}

//! Vector store abstraction for the retrieval chain.
//!
//! The [`VectorStore`] trait covers the two operations the assistant needs:
//! nearest-neighbor queries with an optional metadata [`WhereFilter`], and
//! `add` for external ingestion tools. Backends:
//!
//! | Backend | Struct | Notes |
//! |---------|--------|-------|
//! | `memory` | [`memory::InMemoryStore`] | Tests and throwaway sessions |
//! | `sqlite` | [`sqlite::SqliteVectorStore`] | Local file, brute-force cosine |
//! | `chroma` | [`chroma::ChromaStore`] | Remote Chroma collection over HTTP |
//!
//! Passages are expected to carry `tag_<keyword> = true` metadata written at
//! ingestion time; [`tagged_metadata`] builds that map.

pub mod chroma;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::config::StoreConfig;
use crate::embedding::cosine_similarity;
use crate::error::{AssistantError, Result};
use crate::filter::{tag_key, WhereFilter};
use crate::keywords::KeywordSet;
use crate::models::RetrievedDocument;

/// Parameters of one nearest-neighbor query.
#[derive(Debug, Clone, Copy)]
pub struct VectorQuery<'a> {
    pub embedding: &'a [f32],
    pub n_results: usize,
    pub filter: Option<&'a WhereFilter>,
    /// Ask the store to return passage embeddings alongside the text.
    pub include_embeddings: bool,
}

/// Abstract vector storage backend.
///
/// Query results are ordered by store relevance, most relevant first.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name for logs (`"memory"`, `"sqlite"`, `"chroma"`).
    fn name(&self) -> &str;

    /// Insert or replace a passage.
    async fn add(
        &self,
        id: &str,
        embedding: &[f32],
        document: &str,
        metadata: &Map<String, Value>,
    ) -> Result<()>;

    /// Return up to `n_results` passages nearest to the query embedding.
    async fn query(&self, query: &VectorQuery<'_>) -> Result<Vec<RetrievedDocument>>;

    /// Number of stored passages.
    async fn count(&self) -> Result<usize>;
}

/// Content-derived passage id (hex SHA-256 of the text).
pub fn passage_id(document: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document.as_bytes());
    hex::encode(hasher.finalize())
}

/// Metadata map with a `tag_<keyword> = true` entry per keyword.
///
/// Keywords that cannot form a metadata key are skipped.
pub fn tagged_metadata(keywords: &KeywordSet) -> Map<String, Value> {
    keywords
        .iter()
        .filter_map(|k| tag_key(k).ok())
        .map(|key| (key, Value::Bool(true)))
        .collect()
}

/// A stored passage as seen by the brute-force backends.
pub(crate) struct StoredPassage {
    pub id: String,
    pub document: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
}

/// Filter, score, and truncate passages for a query.
///
/// Shared by the in-process backends; equal scores keep insertion order.
pub(crate) fn nearest<'a>(
    passages: impl Iterator<Item = &'a StoredPassage>,
    query: &VectorQuery<'_>,
) -> Vec<RetrievedDocument> {
    let mut scored: Vec<(f32, &StoredPassage)> = passages
        .filter(|p| query.filter.map_or(true, |f| f.matches(&p.metadata)))
        .map(|p| (cosine_similarity(query.embedding, &p.embedding), p))
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.truncate(query.n_results);

    scored
        .into_iter()
        .map(|(_, p)| RetrievedDocument {
            content: p.document.clone(),
            embedding: query.include_embeddings.then(|| p.embedding.clone()),
            metadata: p.metadata.clone(),
        })
        .collect()
}

/// Create the configured [`VectorStore`].
///
/// The sqlite backend opens (and migrates) its database file here.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(memory::InMemoryStore::new())),
        "sqlite" => Ok(Arc::new(sqlite::SqliteVectorStore::open(&config.path).await?)),
        "chroma" => {
            let url = config.url.as_deref().ok_or_else(|| {
                AssistantError::Config("store.url is required for the chroma backend".to_string())
            })?;
            Ok(Arc::new(chroma::ChromaStore::new(
                url,
                &config.collection,
                config.timeout_secs,
            )?))
        }
        other => Err(AssistantError::Config(format!(
            "Unknown store backend: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passage_id_is_stable_hex() {
        let a = passage_id("Students must wear their ID.");
        let b = passage_id("Students must wear their ID.");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, passage_id("Something else."));
    }

    #[test]
    fn test_tagged_metadata() {
        let keywords: KeywordSet = ["tardy", "policy", "bad key"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let meta = tagged_metadata(&keywords);
        assert_eq!(meta.len(), 2);
        assert_eq!(meta.get("tag_tardy"), Some(&Value::Bool(true)));
        assert_eq!(meta.get("tag_policy"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_nearest_ranks_non_finite_embedding_last() {
        let passage = |id: &str, embedding: Vec<f32>| StoredPassage {
            id: id.to_string(),
            document: id.to_string(),
            embedding,
            metadata: Map::new(),
        };
        let passages = vec![
            passage("broken", vec![f32::INFINITY, 1.0]),
            passage("close", vec![1.0, 0.1]),
            passage("far", vec![0.1, 1.0]),
        ];
        let query = VectorQuery {
            embedding: &[1.0, 0.0],
            n_results: 3,
            filter: None,
            include_embeddings: false,
        };
        let docs = nearest(passages.iter(), &query);
        let order: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(order, vec!["close", "far", "broken"]);
    }
}

//! In-memory [`VectorStore`] implementation for tests and short-lived sessions.
//!
//! Passages live in a `Vec` behind `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every passage that passes the filter.

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{AssistantError, Result};
use crate::models::RetrievedDocument;

use super::{nearest, StoredPassage, VectorQuery, VectorStore};

/// In-memory store.
pub struct InMemoryStore {
    passages: RwLock<Vec<StoredPassage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            passages: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> AssistantError {
    AssistantError::StoreQueryFailed("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn add(
        &self,
        id: &str,
        embedding: &[f32],
        document: &str,
        metadata: &Map<String, Value>,
    ) -> Result<()> {
        let mut passages = self.passages.write().map_err(|_| poisoned())?;
        let passage = StoredPassage {
            id: id.to_string(),
            document: document.to_string(),
            embedding: embedding.to_vec(),
            metadata: metadata.clone(),
        };
        match passages.iter_mut().find(|p| p.id == id) {
            Some(existing) => *existing = passage,
            None => passages.push(passage),
        }
        Ok(())
    }

    async fn query(&self, query: &VectorQuery<'_>) -> Result<Vec<RetrievedDocument>> {
        let passages = self.passages.read().map_err(|_| poisoned())?;
        Ok(nearest(passages.iter(), query))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.passages.read().map_err(|_| poisoned())?.len())
    }
}

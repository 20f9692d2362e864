//! [`VectorStore`] client for a Chroma server (HTTP API v1).
//!
//! The collection is looked up by name on first use
//! (`GET /api/v1/collections/{name}`) and its id cached. Queries go to
//! `POST /api/v1/collections/{id}/query` with the filter serialized as
//! Chroma's `where` clause.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;

use crate::error::{AssistantError, Result};
use crate::models::RetrievedDocument;

use super::{VectorQuery, VectorStore};

pub struct ChromaStore {
    url: String,
    collection: String,
    collection_id: OnceCell<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
}

/// Column-oriented query response; each field holds one list per query embedding.
#[derive(Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<Vec<f32>>>>,
}

fn store_error(message: impl Into<String>) -> AssistantError {
    AssistantError::StoreQueryFailed(message.into())
}

impl ChromaStore {
    pub fn new(url: &str, collection: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AssistantError::Other(e.into()))?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
            collection_id: OnceCell::new(),
            client,
        })
    }

    async fn collection_id(&self) -> Result<&str> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let url = format!("{}/api/v1/collections/{}", self.url, self.collection);
                let response = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| store_error(format!("chroma unreachable at {}: {}", self.url, e)))?;
                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(store_error(format!(
                        "chroma collection '{}' lookup failed {}: {}",
                        self.collection, status, body
                    )));
                }
                let collection: CollectionResponse = response
                    .json()
                    .await
                    .map_err(|e| store_error(format!("invalid chroma collection response: {}", e)))?;
                Ok::<String, AssistantError>(collection.id)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    store_error(format!("chroma request timed out: {}", e))
                } else {
                    store_error(format!("chroma unreachable at {}: {}", self.url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(store_error(format!("chroma error {}: {}", status, body)));
        }
        response
            .json()
            .await
            .map_err(|e| store_error(format!("invalid chroma response: {}", e)))
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn name(&self) -> &str {
        "chroma"
    }

    async fn add(
        &self,
        id: &str,
        embedding: &[f32],
        document: &str,
        metadata: &Map<String, Value>,
    ) -> Result<()> {
        let collection_id = self.collection_id().await?;
        let mut body = json!({
            "ids": [id],
            "embeddings": [embedding],
            "documents": [document],
        });
        // Chroma rejects empty metadata objects.
        if !metadata.is_empty() {
            body["metadatas"] = json!([metadata]);
        }
        self.post(&format!("/api/v1/collections/{}/upsert", collection_id), &body)
            .await?;
        Ok(())
    }

    async fn query(&self, query: &VectorQuery<'_>) -> Result<Vec<RetrievedDocument>> {
        let collection_id = self.collection_id().await?;

        let mut include = vec!["documents", "metadatas"];
        if query.include_embeddings {
            include.push("embeddings");
        }
        let mut body = json!({
            "query_embeddings": [query.embedding],
            "n_results": query.n_results,
            "include": include,
        });
        if let Some(filter) = query.filter {
            body["where"] = filter.to_json();
        }

        let raw = self
            .post(&format!("/api/v1/collections/{}/query", collection_id), &body)
            .await?;
        let response: QueryResponse = serde_json::from_value(raw)
            .map_err(|e| store_error(format!("unexpected chroma query shape: {}", e)))?;
        Ok(flatten_response(response))
    }

    async fn count(&self) -> Result<usize> {
        let collection_id = self.collection_id().await?;
        let url = format!("{}/api/v1/collections/{}/count", self.url, collection_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| store_error(format!("chroma unreachable at {}: {}", self.url, e)))?;
        if !response.status().is_success() {
            return Err(store_error(format!("chroma count failed: {}", response.status())));
        }
        response
            .json::<usize>()
            .await
            .map_err(|e| store_error(format!("invalid chroma count response: {}", e)))
    }
}

/// Take the first (only) query's column lists and zip them into documents.
fn flatten_response(response: QueryResponse) -> Vec<RetrievedDocument> {
    let documents = response
        .documents
        .and_then(|d| d.into_iter().next())
        .unwrap_or_default();
    let mut metadatas = response
        .metadatas
        .and_then(|m| m.into_iter().next())
        .unwrap_or_default()
        .into_iter();
    let mut embeddings = response
        .embeddings
        .and_then(|e| e.into_iter().next())
        .unwrap_or_default()
        .into_iter();

    documents
        .into_iter()
        .filter_map(|doc| {
            let metadata = metadatas.next().flatten().unwrap_or_default();
            let embedding = embeddings.next();
            doc.map(|content| RetrievedDocument {
                content,
                embedding,
                metadata,
            })
        })
        .collect()
}

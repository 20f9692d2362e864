//! The retrieval chain: question in, grounded answer out.
//!
//! One [`RetrievalChain::invoke`] runs these steps in order:
//!
//! 1. Ask the generator for alternative phrasings of the question.
//! 2. Embed the question and every alternative (`search_query`).
//! 3. Extract keywords from all phrasings and build a [`WhereFilter`].
//! 4. Query the store once per phrasing, deduplicating by passage text.
//! 5. Re-rank the union by cosine similarity to the question's embedding.
//! 6. Join the ranked passages into a context block.
//! 7. Generate the answer from the persona prompt, history, and question.
//!
//! Steps 1, 2 (for the question itself) and 7 are fatal on failure. A failed
//! alternative embedding or store query is logged and skipped. The chain holds
//! no per-conversation state; callers own the chat history.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, RerankMode};
use crate::embedding::{self, cosine_similarity, EmbeddingProvider, Purpose};
use crate::error::{AssistantError, Result};
use crate::filter::WhereFilter;
use crate::generation::{self, generate_text, GenerationOptions, GenerationProvider};
use crate::keywords::{KeywordExtractor, KeywordSet};
use crate::models::{ChainInput, ChainOutput, Message};
use crate::prompt::{self, Persona, NO_CONTEXT};
use crate::store::{self, VectorQuery, VectorStore};

/// Tunables for one chain, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct ChainOptions {
    pub n_results: usize,
    pub history_aware: bool,
    pub alternative_temperature: f32,
    pub answer_temperature: f32,
    pub max_tokens: Option<u32>,
    pub keyword_filter: bool,
    pub rerank: RerankMode,
    pub use_fallback: bool,
    pub include_verb: bool,
    pub from_alternatives: bool,
    pub store_timeout: Duration,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ChainOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            n_results: config.retrieval.n_results,
            history_aware: config.retrieval.history_aware,
            alternative_temperature: config.retrieval.alternative_temperature,
            answer_temperature: config.retrieval.answer_temperature,
            max_tokens: config.retrieval.max_tokens,
            keyword_filter: config.retrieval.keyword_filter,
            rerank: config.retrieval.rerank,
            use_fallback: config.keywords.use_fallback,
            include_verb: config.keywords.include_verb,
            from_alternatives: config.keywords.from_alternatives,
            store_timeout: Duration::from_secs(config.store.timeout_secs),
        }
    }
}

/// A passage after re-ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedDocument {
    pub content: String,
    pub score: f32,
}

/// Everything one retrieval pass produced, up to (not including) the answer.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub alternative_queries: Vec<String>,
    pub keywords: KeywordSet,
    pub filter: Option<WhereFilter>,
    pub documents: Vec<RankedDocument>,
    pub context: String,
}

pub struct RetrievalChain {
    generator: Arc<dyn GenerationProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    keywords: KeywordExtractor,
    persona: Persona,
    options: ChainOptions,
}

impl RetrievalChain {
    pub fn new(
        generator: Arc<dyn GenerationProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        keywords: KeywordExtractor,
        persona: Persona,
        options: ChainOptions,
    ) -> Self {
        Self {
            generator,
            embedder,
            store,
            keywords,
            persona,
            options,
        }
    }

    /// Build providers, store, and extractor from configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let generator = generation::create_provider(&config.generation)?;
        let embedder = embedding::create_provider(&config.embedding)?;
        let store = store::create_store(&config.store).await?;
        tracing::debug!(
            generator = generator.model_name(),
            embedder = embedder.model_name(),
            store = store.name(),
            "retrieval chain configured"
        );
        Ok(Self::new(
            generator,
            embedder,
            store,
            KeywordExtractor::from_config(&config.keywords),
            config.assistant.to_persona(),
            ChainOptions::from_config(config),
        ))
    }

    /// History as seen by the prompts: dropped entirely unless history-aware.
    fn effective_history<'a>(&self, history: Option<&'a [Message]>) -> Option<&'a [Message]> {
        if self.options.history_aware {
            Some(history.unwrap_or_default())
        } else {
            None
        }
    }

    /// Run the chain and return the generated answer.
    pub async fn invoke(&self, input: ChainInput) -> Result<ChainOutput> {
        let ChainInput {
            input,
            chat_history,
            n_results,
        } = input;
        let history = self.effective_history(chat_history.as_deref());

        let retrieval = self.retrieve_with(&input, history, n_results).await?;
        let answer = self.generate_answer(&input, history, &retrieval).await?;

        Ok(ChainOutput { answer })
    }

    /// Generate the answer for an already-computed [`Retrieval`].
    ///
    /// `history` is filtered the same way [`invoke`](Self::invoke) filters it.
    pub async fn answer(
        &self,
        input: &str,
        history: Option<&[Message]>,
        retrieval: &Retrieval,
    ) -> Result<String> {
        self.generate_answer(input, self.effective_history(history), retrieval)
            .await
    }

    async fn generate_answer(
        &self,
        input: &str,
        history: Option<&[Message]>,
        retrieval: &Retrieval,
    ) -> Result<String> {
        let messages = prompt::answer_messages(&self.persona, input, &retrieval.context, history);
        let options = GenerationOptions {
            temperature: self.options.answer_temperature,
            max_tokens: self.options.max_tokens,
        };
        let answer = generate_text(self.generator.as_ref(), messages, options).await?;
        if answer.is_empty() {
            return Err(AssistantError::provider(
                self.generator.model_name(),
                "empty completion",
            ));
        }
        tracing::debug!(chars = answer.len(), "answer generated");
        Ok(answer)
    }

    /// Run every step up to the answer and return the assembled context.
    ///
    /// `n_results` overrides the configured per-query passage count.
    pub async fn retrieve(
        &self,
        input: &str,
        history: Option<&[Message]>,
        n_results: Option<usize>,
    ) -> Result<Retrieval> {
        self.retrieve_with(input, self.effective_history(history), n_results)
            .await
    }

    async fn retrieve_with(
        &self,
        input: &str,
        history: Option<&[Message]>,
        n_results: Option<usize>,
    ) -> Result<Retrieval> {
        if input.trim().is_empty() {
            return Err(AssistantError::invalid_input("input must not be empty"));
        }
        let n_results = n_results.unwrap_or(self.options.n_results);
        if n_results == 0 {
            return Err(AssistantError::invalid_input("n_results must be at least 1"));
        }

        let alternatives = self.alternative_queries(input, history).await?;

        let query_embedding = self.embedder.embed(input, Purpose::SearchQuery).await?;
        let mut queries: Vec<(String, Vec<f32>)> = vec![(input.to_string(), query_embedding.clone())];
        for alternative in &alternatives {
            match self.embedder.embed(alternative, Purpose::SearchQuery).await {
                Ok(vector) => queries.push((alternative.clone(), vector)),
                Err(e) => {
                    tracing::warn!(query = %alternative, error = %e, "dropping alternative query: embedding failed")
                }
            }
        }

        let keywords = self.collect_keywords(input, &alternatives);
        tracing::debug!(?keywords, "extracted keywords for filtering");
        let filter = self.build_filter(&keywords);

        let documents = self
            .search(&queries, &query_embedding, filter.as_ref(), n_results)
            .await;

        let context = if documents.is_empty() {
            NO_CONTEXT.to_string()
        } else {
            documents
                .iter()
                .map(|d| d.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        Ok(Retrieval {
            alternative_queries: alternatives,
            keywords,
            filter,
            documents,
            context,
        })
    }

    async fn alternative_queries(&self, input: &str, history: Option<&[Message]>) -> Result<Vec<String>> {
        let messages = prompt::alternative_query_messages(input, history);
        let options = GenerationOptions {
            temperature: self.options.alternative_temperature,
            max_tokens: self.options.max_tokens,
        };
        let raw = generate_text(self.generator.as_ref(), messages, options).await?;
        let alternatives: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        tracing::debug!(?alternatives, "generated alternative queries");
        Ok(alternatives)
    }

    fn collect_keywords(&self, input: &str, alternatives: &[String]) -> KeywordSet {
        let extract = |text: &str| {
            self.keywords
                .extract(text, self.options.use_fallback, self.options.include_verb)
        };
        let mut keywords = extract(input);
        if self.options.from_alternatives {
            for alternative in alternatives {
                keywords.extend(extract(alternative));
            }
        }
        keywords
    }

    fn build_filter(&self, keywords: &KeywordSet) -> Option<WhereFilter> {
        if !self.options.keyword_filter {
            return None;
        }
        match WhereFilter::from_keywords(keywords) {
            Ok(Some(filter)) => {
                tracing::debug!(filter = %filter.to_json(), "applying metadata filter");
                Some(filter)
            }
            Ok(None) => {
                tracing::debug!("no keywords extracted; searching without a filter");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not build metadata filter; searching without one");
                None
            }
        }
    }

    /// Query once per phrasing, dedupe by content, and re-rank.
    async fn search(
        &self,
        queries: &[(String, Vec<f32>)],
        query_embedding: &[f32],
        filter: Option<&WhereFilter>,
        n_results: usize,
    ) -> Vec<RankedDocument> {
        let include_embeddings = self.options.rerank == RerankMode::Document;
        // Insertion order plus a content index for O(1) duplicate checks.
        let mut ordered: Vec<(String, Vec<f32>)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for (text, embedding) in queries {
            let query = VectorQuery {
                embedding,
                n_results,
                filter,
                include_embeddings,
            };
            let result = tokio::time::timeout(self.options.store_timeout, self.store.query(&query)).await;
            let docs = match result {
                Ok(Ok(docs)) => docs,
                Ok(Err(e)) => {
                    tracing::warn!(query = %text, error = %e, "store query failed; skipping");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        query = %text,
                        timeout_ms = self.options.store_timeout.as_millis() as u64,
                        "store query timed out; skipping"
                    );
                    continue;
                }
            };
            tracing::debug!(query = %text, count = docs.len(), "retrieved documents");

            for doc in docs {
                if !seen.insert(doc.content.clone()) {
                    continue;
                }
                let bound = match (self.options.rerank, doc.embedding) {
                    (RerankMode::Document, Some(own)) => own,
                    _ => embedding.clone(),
                };
                ordered.push((doc.content, bound));
            }
        }

        let mut ranked: Vec<RankedDocument> = ordered
            .into_iter()
            .map(|(content, bound)| RankedDocument {
                score: cosine_similarity(query_embedding, &bound),
                content,
            })
            .collect();
        // sort_by is stable: ties keep first-retrieved order.
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        if let Some(top) = ranked.first() {
            tracing::debug!(unique = ranked.len(), top_score = top.score, "re-ranked documents");
        }
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Completion;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<String>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerationProvider for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, messages: &[Message], _options: GenerationOptions) -> Result<Completion> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let reply = self.replies.lock().unwrap().pop().unwrap_or_default();
            Ok(Completion::Text(reply))
        }
    }

    /// Embeds by keyword presence so similarity is predictable.
    struct Axes;

    #[async_trait]
    impl EmbeddingProvider for Axes {
        fn model_name(&self) -> &str {
            "axes"
        }

        async fn embed(&self, text: &str, _purpose: Purpose) -> Result<Vec<f32>> {
            let text = text.to_lowercase();
            Ok(vec![
                if text.contains("tard") || text.contains("late") { 1.0 } else { 0.0 },
                if text.contains("uniform") { 1.0 } else { 0.0 },
                0.1,
            ])
        }
    }

    fn chain(generator: Arc<Scripted>, store: Arc<InMemoryStore>, options: ChainOptions) -> RetrievalChain {
        RetrievalChain::new(
            generator,
            Arc::new(Axes),
            store,
            KeywordExtractor::with_rules(),
            Persona {
                name: "Emma".to_string(),
                full_description: "My name is Emma.".to_string(),
                additional_prompt: None,
            },
            options,
        )
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let generator = Arc::new(Scripted::new(&[]));
        let chain = chain(generator, Arc::new(InMemoryStore::new()), ChainOptions::default());
        let err = chain.invoke(ChainInput::new("   ")).await.unwrap_err();
        assert!(matches!(err, AssistantError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_empty_store_yields_sentinel_context() {
        let generator = Arc::new(Scripted::new(&["Where is the library?", "I don't know."]));
        let chain = chain(generator.clone(), Arc::new(InMemoryStore::new()), ChainOptions::default());
        let output = chain.invoke(ChainInput::new("Where is the library?")).await.unwrap();
        assert_eq!(output.answer, "I don't know.");

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[1][0].content().contains("---\nNo relevant context found.\n---"));
    }

    #[tokio::test]
    async fn test_history_dropped_when_not_history_aware() {
        let generator = Arc::new(Scripted::new(&["", "Answer."]));
        let options = ChainOptions {
            history_aware: false,
            ..ChainOptions::default()
        };
        let chain = chain(generator.clone(), Arc::new(InMemoryStore::new()), options);
        let input = ChainInput::new("What about uniforms?")
            .with_history(vec![Message::user("Hi"), Message::assistant("Hello")]);
        chain.invoke(input).await.unwrap();

        let seen = generator.seen.lock().unwrap();
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[1].len(), 2);
    }

    #[tokio::test]
    async fn test_document_rerank_uses_store_embedding() {
        let store = Arc::new(InMemoryStore::new());
        store
            .add("a", &[0.0, 1.0, 0.0], "Uniforms are required.", &Map::new())
            .await
            .unwrap();
        store
            .add("b", &[1.0, 0.0, 0.0], "Being late three times is an absence.", &Map::new())
            .await
            .unwrap();
        let generator = Arc::new(Scripted::new(&[""]));
        let options = ChainOptions {
            rerank: RerankMode::Document,
            keyword_filter: false,
            ..ChainOptions::default()
        };
        let chain = chain(generator, store, options);
        let retrieval = chain.retrieve("tardy", None, None).await.unwrap();
        assert_eq!(retrieval.documents.len(), 2);
        assert_eq!(retrieval.documents[0].content, "Being late three times is an absence.");
        assert!(retrieval.documents[0].score > retrieval.documents[1].score);
    }
}

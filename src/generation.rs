//! Text generation provider abstraction and implementations.
//!
//! Defines the [`GenerationProvider`] trait and concrete implementations:
//! - **[`DisabledChatProvider`]** — returns errors; used when generation is not configured.
//! - **[`OpenAIChatProvider`]** — any OpenAI-compatible `/chat/completions` endpoint.
//! - **[`OllamaChatProvider`]** — a local Ollama instance's `/api/chat` endpoint.
//!
//! Callers hand in a [`Prompt`], which is either a bare string or a message
//! list, and receive a [`Completion`]. Providers may return plain text or a
//! structured JSON payload; [`Completion::into_text`] normalizes both to a
//! string, which is the only shape the retrieval chain consumes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::GenerationConfig;
use crate::error::{AssistantError, Result};
use crate::http::{self, JsonEndpoint};
use crate::models::Message;

/// Input accepted by a generation call.
#[derive(Debug, Clone)]
pub enum Prompt {
    /// A single user turn.
    Text(String),
    /// A full conversation.
    Messages(Vec<Message>),
}

impl Prompt {
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Prompt::Text(text) => vec![Message::user(text)],
            Prompt::Messages(messages) => messages,
        }
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

impl From<Vec<Message>> for Prompt {
    fn from(messages: Vec<Message>) -> Self {
        Prompt::Messages(messages)
    }
}

/// Output of a generation call.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text(String),
    /// A provider returned structured output instead of prose.
    Structured(Value),
}

impl Completion {
    /// Normalize to trimmed text; structured payloads are rendered as JSON.
    pub fn into_text(self) -> String {
        match self {
            Completion::Text(text) => text.trim().to_string(),
            Completion::Structured(Value::String(s)) => s.trim().to_string(),
            Completion::Structured(value) => value.to_string(),
        }
    }
}

/// Sampling settings for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl GenerationOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            max_tokens: None,
        }
    }
}

/// Trait for chat-completion backends.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Returns the model identifier.
    fn model_name(&self) -> &str;

    /// Single-shot completion over `messages`.
    async fn generate(&self, messages: &[Message], options: GenerationOptions)
        -> Result<Completion>;
}

/// Convenience wrapper: accept any [`Prompt`] and return normalized text.
pub async fn generate_text(
    provider: &dyn GenerationProvider,
    prompt: impl Into<Prompt>,
    options: GenerationOptions,
) -> Result<String> {
    let messages = prompt.into().into_messages();
    let completion = provider.generate(&messages, options).await?;
    Ok(completion.into_text())
}

/// Interpret a message `content` field: text stays text, anything else is
/// treated as structured output.
fn content_to_completion(provider: &str, content: Option<&Value>) -> Result<Completion> {
    match content {
        Some(Value::String(s)) => Ok(Completion::Text(s.clone())),
        Some(Value::Null) | None => Err(AssistantError::provider(
            provider,
            "invalid response: missing message content",
        )),
        Some(other) => Ok(Completion::Structured(other.clone())),
    }
}

// ============ Disabled Provider ============

/// A no-op provider that always returns errors.
pub struct DisabledChatProvider;

#[async_trait]
impl GenerationProvider for DisabledChatProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _messages: &[Message], _options: GenerationOptions) -> Result<Completion> {
        Err(AssistantError::provider(
            "generation",
            "generation provider is disabled",
        ))
    }
}

// ============ OpenAI-compatible Provider ============

/// Chat provider for OpenAI-compatible servers (`POST {url}/chat/completions`).
pub struct OpenAIChatProvider {
    model: String,
    url: String,
    api_key: Option<String>,
    max_retries: u32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAIChatProvider {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:1234/v1".to_string());
        Ok(Self {
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            api_key: http::api_key_from_env(&config.api_key_env),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAIChatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[Message], options: GenerationOptions) -> Result<Completion> {
        let endpoint = JsonEndpoint {
            provider: "openai",
            url: format!("{}/chat/completions", self.url),
            api_key: self.api_key.as_deref(),
            max_retries: self.max_retries,
            timeout_secs: self.timeout_secs,
        };
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature,
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let response = endpoint.post(&self.client, &body).await?;
        let content = response
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"));
        content_to_completion("openai", content)
    }
}

// ============ Ollama Provider ============

/// Chat provider for a local Ollama instance (`POST {url}/api/chat`).
pub struct OllamaChatProvider {
    model: String,
    url: String,
    max_retries: u32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OllamaChatProvider {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl GenerationProvider for OllamaChatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[Message], options: GenerationOptions) -> Result<Completion> {
        let endpoint = JsonEndpoint {
            provider: "ollama",
            url: format!("{}/api/chat", self.url),
            api_key: None,
            max_retries: self.max_retries,
            timeout_secs: self.timeout_secs,
        };
        let mut model_options = json!({ "temperature": options.temperature });
        if let Some(max_tokens) = options.max_tokens {
            model_options["num_predict"] = json!(max_tokens);
        }
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": model_options,
        });

        let response = endpoint.post(&self.client, &body).await?;
        let content = response.get("message").and_then(|m| m.get("content"));
        content_to_completion("ollama", content)
    }
}

/// Create the appropriate [`GenerationProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledChatProvider`] |
/// | `"openai"` | [`OpenAIChatProvider`] |
/// | `"ollama"` | [`OllamaChatProvider`] |
pub fn create_provider(config: &GenerationConfig) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChatProvider)),
        "openai" => Ok(Arc::new(OpenAIChatProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChatProvider::new(config)?)),
        other => Err(AssistantError::Config(format!(
            "Unknown generation provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_prompt_becomes_user_message() {
        let messages = Prompt::from("hello").into_messages();
        assert_eq!(messages, vec![Message::user("hello")]);
    }

    #[test]
    fn test_completion_into_text_trims() {
        assert_eq!(Completion::Text("  hi \n".to_string()).into_text(), "hi");
    }

    #[test]
    fn test_structured_completion_renders_json() {
        let completion = Completion::Structured(json!({"answer": 3}));
        assert_eq!(completion.into_text(), r#"{"answer":3}"#);
        let string = Completion::Structured(json!(" plain "));
        assert_eq!(string.into_text(), "plain");
    }

    #[test]
    fn test_content_to_completion() {
        let text = json!("ok");
        assert_eq!(
            content_to_completion("t", Some(&text)).unwrap(),
            Completion::Text("ok".to_string())
        );
        assert!(content_to_completion("t", Some(&Value::Null)).is_err());
        assert!(content_to_completion("t", None).is_err());
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let err = generate_text(
            &DisabledChatProvider,
            "hello",
            GenerationOptions::with_temperature(0.2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AssistantError::ProviderUnavailable { .. }));
    }
}

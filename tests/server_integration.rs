//! HTTP API tests against a spawned server.

use async_trait::async_trait;
use handbook_assistant::chain::{ChainOptions, RetrievalChain};
use handbook_assistant::embedding::{EmbeddingProvider, Purpose};
use handbook_assistant::error::{AssistantError, Result};
use handbook_assistant::generation::{Completion, GenerationOptions, GenerationProvider};
use handbook_assistant::keywords::KeywordExtractor;
use handbook_assistant::models::Message;
use handbook_assistant::prompt::Persona;
use handbook_assistant::server::run_server_with_chain;
use handbook_assistant::store::memory::InMemoryStore;
use serde_json::{json, Value};
use std::sync::Arc;

/// Echoes the question back; fails on questions containing "explode".
struct EchoGenerator;

#[async_trait]
impl GenerationProvider for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, messages: &[Message], _options: GenerationOptions) -> Result<Completion> {
        let last = messages.last().map(|m| m.content()).unwrap_or_default();
        if last.starts_with("Generate alternative search queries") {
            return Ok(Completion::Text(String::new()));
        }
        if last.contains("explode") {
            return Err(AssistantError::provider("echo", "backend unreachable"));
        }
        let turns = messages.len() - 2;
        Ok(Completion::Text(format!("echo: {} ({} history)", last, turns)))
    }
}

struct ConstantEmbedder;

#[async_trait]
impl EmbeddingProvider for ConstantEmbedder {
    fn model_name(&self) -> &str {
        "constant"
    }

    async fn embed(&self, _text: &str, _purpose: Purpose) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }
}

fn test_chain() -> Arc<RetrievalChain> {
    Arc::new(RetrievalChain::new(
        Arc::new(EchoGenerator),
        Arc::new(ConstantEmbedder),
        Arc::new(InMemoryStore::new()),
        KeywordExtractor::with_rules(),
        Persona {
            name: "Emma".to_string(),
            full_description: "My name is Emma.".to_string(),
            additional_prompt: None,
        },
        ChainOptions::default(),
    ))
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn start_server() -> String {
    let port = find_free_port();
    let bind = format!("127.0.0.1:{}", port);
    let chain = test_chain();
    tokio::spawn(async move {
        run_server_with_chain(&bind, chain, "Emma - Handbook Assistant")
            .await
            .ok();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn test_health() {
    let base = start_server().await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["name"], "Emma - Handbook Assistant");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_invoke_with_history() {
    let base = start_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/invoke", base))
        .json(&json!({
            "config": {},
            "kwargs": {},
            "input": {
                "input": "What is the tardy policy?",
                "chat_history": [
                    {"role": "user", "content": "Hi"},
                    {"role": "assistant", "content": "Hello!"}
                ]
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["answer"], "echo: What is the tardy policy? (2 history)");
}

#[tokio::test]
async fn test_batch_answers_in_order() {
    let base = start_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/batch", base))
        .json(&json!({
            "inputs": [
                {"input": "first"},
                {"input": "second", "n_results": 2}
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["answers"],
        json!(["echo: first (0 history)", "echo: second (0 history)"])
    );
}

#[tokio::test]
async fn test_error_contract() {
    let base = start_server().await;
    let client = reqwest::Client::new();

    // Empty input → 400
    let resp = client
        .post(format!("{}/invoke", base))
        .json(&json!({"input": {"input": "   "}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    // Malformed body → 400 with the same envelope
    let resp = client
        .post(format!("{}/invoke", base))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    // Unknown role in history → 400
    let resp = client
        .post(format!("{}/invoke", base))
        .json(&json!({"input": {"input": "hi", "chat_history": [{"role": "robot", "content": "x"}]}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Provider failure → 502
    let resp = client
        .post(format!("{}/invoke", base))
        .json(&json!({"input": {"input": "please explode"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "provider_unavailable");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("backend unreachable"));

    // First failure fails the batch
    let resp = client
        .post(format!("{}/batch", base))
        .json(&json!({"inputs": [{"input": "fine"}, {"input": "explode"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
}

#[tokio::test]
async fn test_cors_preflight() {
    let base = start_server().await;
    let client = reqwest::Client::new();
    let resp = client
        .request(reqwest::Method::OPTIONS, format!("{}/invoke", base))
        .header("Origin", "http://localhost:3000")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

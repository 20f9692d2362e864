//! HTTP API around the retrieval chain.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/invoke` | Answer one question |
//! | `POST` | `/batch` | Answer several questions in order |
//! | `GET`  | `/health` | Health check (returns name and version) |
//!
//! `/invoke` accepts the envelope used by LangServe-style clients:
//!
//! ```json
//! { "input": { "input": "What is the tardy policy?", "chat_history": [] }, "config": {}, "kwargs": {} }
//! ```
//!
//! and answers `{ "answer": "..." }`. `config` and `kwargs` are accepted and
//! ignored.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "input must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `provider_unavailable` (502),
//! `timeout` (504), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser front end
//! can be served from anywhere.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chain::RetrievalChain;
use crate::config::Config;
use crate::error::AssistantError;
use crate::models::{ChainInput, ChainOutput};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    chain: Arc<RetrievalChain>,
    name: Arc<str>,
}

/// Builds the chain from `config` and serves it on `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let chain = RetrievalChain::from_config(config).await?;
    run_server_with_chain(&config.server.bind, Arc::new(chain), &config.assistant.title).await
}

/// Serves an already-built chain. Used by tests and embedding applications.
pub async fn run_server_with_chain(
    bind_addr: &str,
    chain: Arc<RetrievalChain>,
    name: &str,
) -> anyhow::Result<()> {
    let app = router(chain, name);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "handbook assistant listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// The application router, without binding a socket.
pub fn router(chain: Arc<RetrievalChain>, name: &str) -> Router {
    let state = AppState {
        chain,
        name: Arc::from(name),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/invoke", post(handle_invoke))
        .route("/batch", post(handle_batch))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<AssistantError> for AppError {
    fn from(err: AssistantError) -> Self {
        let (status, code) = match &err {
            AssistantError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AssistantError::ProviderUnavailable { .. } => {
                (StatusCode::BAD_GATEWAY, "provider_unavailable")
            }
            AssistantError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

// ============ POST /invoke ============

#[derive(Deserialize)]
struct InvokeRequest {
    input: ChainInput,
    #[serde(default)]
    #[allow(dead_code)]
    config: Option<serde_json::Value>,
    #[serde(default)]
    #[allow(dead_code)]
    kwargs: Option<serde_json::Value>,
}

async fn handle_invoke(
    State(state): State<AppState>,
    body: Result<Json<InvokeRequest>, JsonRejection>,
) -> Result<Json<ChainOutput>, AppError> {
    let Json(request) = body?;
    let output = state.chain.invoke(request.input).await?;
    Ok(Json(output))
}

// ============ POST /batch ============

#[derive(Deserialize)]
struct BatchRequest {
    inputs: Vec<ChainInput>,
    #[serde(default)]
    #[allow(dead_code)]
    config: Option<serde_json::Value>,
    #[serde(default)]
    #[allow(dead_code)]
    kwargs: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct BatchResponse {
    answers: Vec<String>,
}

/// Answers each input in order; the first failure fails the whole batch.
async fn handle_batch(
    State(state): State<AppState>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<BatchResponse>, AppError> {
    let Json(request) = body?;
    let mut answers = Vec::with_capacity(request.inputs.len());
    for input in request.inputs {
        answers.push(state.chain.invoke(input).await?.answer);
    }
    Ok(Json(BatchResponse { answers }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    name: String,
    version: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        name: state.name.to_string(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

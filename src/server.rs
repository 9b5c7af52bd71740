//! HTTP surface over the answer engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/ask-rag` | Answer a question with cited sources |
//! | `GET`  | `/health` | Liveness check with server time |
//!
//! # Error Contract
//!
//! ```json
//! { "ok": false, "error": "question required" }
//! ```
//!
//! Status codes: `400` for a missing or empty question (or an unreadable
//! body), `503` while no index has been built, `500` for anything else.
//!
//! Requests are stateless: each question is answered without history.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::answer::AnswerEngine;
use crate::chat::create_chat_model;
use crate::config::{Config, ServerConfig};
use crate::embedding::create_embedder;
use crate::error::{rag_error, RagError};
use crate::models::Source;
use crate::session::Conversation;

const DEFAULT_TOP_K: i64 = 5;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<AnswerEngine>,
}

impl AppState {
    pub fn new(engine: Arc<AnswerEngine>) -> Self {
        Self { engine }
    }
}

/// Starts the server with providers built from `config`.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let chat = create_chat_model(&config.chat)?;
    let engine = AnswerEngine::new(config, embedder, chat);
    run_server_with_engine(config, Arc::new(engine)).await
}

/// Like [`run_server`], with a caller-supplied engine.
pub async fn run_server_with_engine(
    config: &Config,
    engine: Arc<AnswerEngine>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    if !config.chat.is_enabled() {
        tracing::warn!("chat provider is disabled; answers that pass the evidence gate will fail");
    }
    if !engine.store().is_available() {
        tracing::warn!("no index yet; /api/ask-rag answers 503 until `erag ingest` has run");
    }

    let app = router(AppState::new(engine), &config.server);

    println!("RAG server listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState, server: &ServerConfig) -> Router {
    Router::new()
        .route("/api/ask-rag", post(handle_ask))
        .route("/health", get(handle_health))
        .layer(cors_layer(&server.allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &str) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(origins))
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            ok: false,
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn classify_error(err: anyhow::Error) -> AppError {
    match rag_error(&err) {
        Some(RagError::EmptyQuestion) => bad_request("question required"),
        Some(RagError::MissingIndex { .. }) => AppError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: err.to_string(),
        },
        _ => {
            tracing::error!("ask-rag failed: {:#}", err);
            AppError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: format!("{:#}", err),
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    ts: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        ts: chrono::Utc::now().to_rfc3339(),
    })
}

// ============ POST /api/ask-rag ============

#[derive(Debug, Deserialize)]
struct AskRequest {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    top_k: Option<i64>,
}

#[derive(Serialize)]
struct AskResponse {
    ok: bool,
    answer: String,
    sources: Vec<Source>,
}

/// `top_k` clamped to `[1, max_docs]`.
fn effective_top_k(requested: Option<i64>, max_docs: usize) -> usize {
    let requested = requested.unwrap_or(DEFAULT_TOP_K).max(1);
    usize::try_from(requested)
        .unwrap_or(max_docs)
        .clamp(1, max_docs.max(1))
}

async fn handle_ask(
    State(state): State<AppState>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;

    let question = request.question.unwrap_or_default();
    if question.trim().is_empty() {
        return Err(bad_request("question required"));
    }

    let top_k = effective_top_k(request.top_k, state.engine.max_docs());
    let answer = state
        .engine
        .ask_with_limit(&question, &Conversation::new(), top_k)
        .await
        .map_err(classify_error)?;

    Ok(Json(AskResponse {
        ok: true,
        answer: answer.text,
        sources: answer.sources,
    }))
}

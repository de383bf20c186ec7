//! HTTP surface (external interfaces).
//!
//! Four routes, one per wire dialect the relay understands, each doing
//! nothing but extracting the raw request and handing it to
//! [`crate::dispatch::dispatch`], plus a bare health check for whatever
//! supervises the process.

use axum::{
    body::Bytes,
    extract::RawQuery,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::config::Platform;
use crate::dispatch;

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn claude_messages(headers: HeaderMap, RawQuery(query): RawQuery, body: Bytes) -> Response {
    dispatch::dispatch(Platform::Claude, "/v1/messages", headers, query, body).await
}

async fn codex_responses(headers: HeaderMap, RawQuery(query): RawQuery, body: Bytes) -> Response {
    dispatch::dispatch(Platform::Codex, "/responses", headers, query, body).await
}

async fn gemini_chat_completions(headers: HeaderMap, RawQuery(query): RawQuery, body: Bytes) -> Response {
    dispatch::dispatch(Platform::Gemini, "/v1/chat/completions", headers, query, body).await
}

async fn gemini_embeddings(headers: HeaderMap, RawQuery(query): RawQuery, body: Bytes) -> Response {
    dispatch::dispatch(Platform::Gemini, "/v1/embeddings", headers, query, body).await
}

async fn not_found() -> impl IntoResponse {
    dispatch::error::ForwardError::UpstreamNotFound("no route matches this path".to_string())
}

/// Builds the full axum router. Kept separate from the binary's `main` so
/// tests (and any future in-process harness) can exercise it without
/// standing up a real listener.
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/messages", post(claude_messages))
        .route("/responses", post(codex_responses))
        .route("/v1/chat/completions", post(gemini_chat_completions))
        .route("/v1/embeddings", post(gemini_embeddings))
        .fallback(not_found)
}

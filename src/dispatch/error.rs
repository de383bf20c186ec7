//! Request-path error types.
//!
//! Covers errors that can happen while dispatching a client request and
//! knows how to render itself as the relay's own JSON error envelope —
//! never an upstream body, which the dispatcher always forwards verbatim
//! instead of wrapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ForwardError {
    #[error("Unauthorized: {0}")]
    #[allow(dead_code)]
    Unauthorized(String),
    #[error("Model not found: {0}")]
    ModelNotFound(String),
    #[error("Upstream not found: {0}")]
    #[allow(dead_code)]
    UpstreamNotFound(String),
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Timeout: {0}")]
    #[allow(dead_code)]
    Timeout(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ForwardError {
    /// The `error.type` string used in the relay's JSON error envelope.
    fn kind(&self) -> &'static str {
        match self {
            ForwardError::Unauthorized(_) => "unauthorized",
            ForwardError::ModelNotFound(_) => "not_found_error",
            ForwardError::UpstreamNotFound(_) => "not_found_error",
            ForwardError::RequestFailed(_) => "api_error",
            ForwardError::InvalidRequest(_) => "invalid_request_error",
            ForwardError::Timeout(_) => "timeout_error",
            ForwardError::Internal(_) => "api_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ForwardError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ForwardError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            ForwardError::UpstreamNotFound(_) => StatusCode::NOT_FOUND,
            ForwardError::RequestFailed(_) => StatusCode::BAD_GATEWAY,
            ForwardError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ForwardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ForwardError::Unauthorized(m)
            | ForwardError::ModelNotFound(m)
            | ForwardError::UpstreamNotFound(m)
            | ForwardError::RequestFailed(m)
            | ForwardError::InvalidRequest(m)
            | ForwardError::Timeout(m)
            | ForwardError::Internal(m) => m.clone(),
        }
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let message = self.message();
        crate::logger::warn(
            "dispatcher",
            &format!("returning error to client: status={} kind={} message={}", status, kind, message),
        );
        (
            status,
            Json(serde_json::json!({
                "type": "error",
                "error": { "type": kind, "message": message }
            })),
        )
            .into_response()
    }
}

pub type ForwardResult<T> = Result<T, ForwardError>;

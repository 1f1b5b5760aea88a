//! Error envelope
//!
//! Maps engine errors onto HTTP statuses and the uniform
//! `{"error": {"code", "message", "details"}}` body. Internal causes are
//! logged in full and never leak to callers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use helmsman_core::Error as CoreError;

/// Wrapper implementing the HTTP mapping
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            CoreError::Validation { .. } => (StatusCode::BAD_REQUEST, "validation_error"),
            CoreError::Auth(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            CoreError::Permission(_) => (StatusCode::FORBIDDEN, "forbidden"),
            CoreError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            CoreError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable"),
            CoreError::Permanent(_) => (StatusCode::INTERNAL_SERVER_ERROR, "upstream_error"),
            CoreError::DeadlineExceeded => (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded"),
            CoreError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let mut body = json!({
            "error": {
                "code": code,
                "message": match &self.0 {
                    // Opaque messages for server-side faults
                    CoreError::Permanent(cause) | CoreError::Internal(cause) => {
                        tracing::error!(cause, "request failed");
                        "internal error".to_string()
                    }
                    other => other.to_string(),
                },
            }
        });

        match &self.0 {
            CoreError::Validation { details } => {
                body["error"]["details"] = json!(details);
            }
            CoreError::RateLimited { retry_after_secs } => {
                body["retry_after"] = json!(retry_after_secs);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

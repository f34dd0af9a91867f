//! Gateway error taxonomy and its mapping onto HTTP responses.
//!
//! Every error is rendered as a JSON body with a fixed, client-safe message.
//! Backend transport errors and raw backend bodies are logged, never returned.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::backend::BackendError;
use crate::canary::CanaryFailure;

pub const UNAUTHORIZED_MESSAGE: &str = "Invalid or missing API key";
pub const BACKEND_UNAVAILABLE_MESSAGE: &str = "Backend unavailable";
pub const MALFORMED_RESPONSE_MESSAGE: &str = "Invalid response from backend";
pub const CANARY_FAILED_MESSAGE: &str = "Canary comparison failed";

/// Longest slice of a malformed backend body written to the logs.
const LOGGED_BODY_LIMIT: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid or missing API key")]
    Unauthorized,

    /// Bad canary query parameters; rejected before any backend call.
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("canary comparison failed: {0}")]
    Canary(#[from] CanaryFailure),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Backend(BackendError::Unreachable { .. }) => StatusCode::BAD_GATEWAY,
            Self::Backend(BackendError::MalformedResponse { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Canary(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            Self::Unauthorized => json!({ "error": UNAUTHORIZED_MESSAGE }),
            Self::Validation(msg) => json!({ "error": msg }),
            Self::Backend(BackendError::Unreachable { .. }) => {
                json!({ "error": BACKEND_UNAVAILABLE_MESSAGE })
            }
            Self::Backend(BackendError::MalformedResponse { .. }) => {
                json!({ "error": MALFORMED_RESPONSE_MESSAGE })
            }
            Self::Canary(failure) => {
                let failed: Vec<_> = failure
                    .branches()
                    .iter()
                    .map(|b| {
                        json!({
                            "branch": b.branch.label(),
                            "version": b.version.get(),
                            "reason": b.reason.to_string(),
                        })
                    })
                    .collect();
                json!({ "error": CANARY_FAILED_MESSAGE, "failed": failed })
            }
        }
    }

    fn log(&self) {
        match self {
            Self::Unauthorized => tracing::warn!("Rejected request with invalid or missing API key"),
            Self::Validation(msg) => tracing::warn!(reason = %msg, "Rejected invalid request"),
            Self::Backend(BackendError::Unreachable { reason, timed_out }) => {
                tracing::warn!(error = %reason, timed_out, "Backend unreachable");
            }
            Self::Backend(BackendError::MalformedResponse { status, raw_body }) => {
                tracing::error!(
                    backend_status = status.as_u16(),
                    raw_body = %truncate(raw_body, LOGGED_BODY_LIMIT),
                    "Backend returned a malformed response"
                );
            }
            Self::Canary(failure) => {
                for b in failure.branches() {
                    tracing::warn!(
                        branch = b.branch.label(),
                        version = b.version.get(),
                        reason = %b.reason,
                        detail = b.detail.as_deref().map(|d| truncate(d, LOGGED_BODY_LIMIT)).unwrap_or_default(),
                        "Canary branch failed"
                    );
                }
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.log();
        (self.status(), Json(self.body())).into_response()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

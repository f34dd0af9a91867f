//! # trogon-inference-gateway
//!
//! Authenticating HTTP gateway in front of a model-serving backend, with
//! canary comparison across two model versions.
//!
//! ## How it works
//!
//! 1. Clients send `POST /predict` or `POST /canary?version_a=N&version_b=M`
//!    with an `x-api-key` header and a `{"instances": [...]}` JSON body.
//! 2. The key is checked against `GATEWAY_API_KEYS`. Unknown or missing keys
//!    get `401` and nothing is forwarded.
//! 3. `/predict` forwards the body byte-for-byte to the backend's default
//!    version and relays the backend's status and body unchanged.
//! 4. `/canary` forwards the same bytes to both versions concurrently and
//!    answers `{"version_a": [...], "version_b": [...]}`, or a single `500`
//!    naming the branch that failed.
//!
//! ## Backend paths
//!
//! - Default version: `{GATEWAY_BACKEND_URL}/v1/models/{GATEWAY_MODEL_NAME}:predict`
//! - Named version: `{GATEWAY_BACKEND_URL}/v1/models/{GATEWAY_MODEL_NAME}/versions/{N}:predict`
//!
//! ## Configuration (env vars)
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `GATEWAY_PORT` | `8000` | HTTP listening port |
//! | `GATEWAY_BACKEND_URL` | `http://localhost:8501` | Model-serving base URL |
//! | `GATEWAY_MODEL_NAME` | `my_model` | Model name in backend paths |
//! | `GATEWAY_API_KEYS` | (none) | Comma-separated accepted API keys |
//! | `GATEWAY_BACKEND_TIMEOUT_SECS` | `10` | Per-call backend timeout (min 1) |
//! | `GATEWAY_BACKEND_MAX_RETRIES` | `0` | Retries on transport failure or 5xx |
//! | `GATEWAY_MAX_BODY_BYTES` | `2097152` | Inbound body limit (min 1024) |
//! | `RUST_LOG` | `info` | Log filter (tracing-subscriber) |

pub mod auth;
pub mod backend;
pub mod canary;
pub mod config;
pub mod env;
pub mod error;
pub mod report;
pub mod server;
pub mod version;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use auth::ApiKeySet;
pub use backend::{BackendError, HttpBackend, InferenceBackend, InferenceResponse, Retry};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use server::{AppState, router, serve, serve_until};
pub use version::{ModelVersion, RouteTarget};

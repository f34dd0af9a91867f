//! Axum HTTP surface.
//!
//! - `POST /predict` forwards the body to the backend's default version and
//!   relays the reply unchanged.
//! - `POST /canary?version_a=N&version_b=M` scores the body against two
//!   versions concurrently and pairs the predictions.
//! - `GET /health` is an unauthenticated liveness probe.
//!
//! Credentials are checked before anything else reaches a backend. The
//! server drains in-flight requests on SIGINT or SIGTERM.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::ApiKeySet;
use crate::backend::{HttpBackend, InferenceBackend, InferenceResponse, Retry};
use crate::canary::{self, Branch, CanaryResult};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::version::{ModelVersion, RouteTarget};

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Shared, read-only dependencies of every handler.
#[derive(Clone)]
pub struct AppState<B> {
    pub keys: Arc<ApiKeySet>,
    pub backend: B,
}

impl<B: InferenceBackend> AppState<B> {
    pub fn new(keys: ApiKeySet, backend: B) -> Self {
        Self {
            keys: Arc::new(keys),
            backend,
        }
    }
}

/// Build the gateway router. Request bodies above `max_body_bytes` are
/// rejected with 413 before any handler runs.
pub fn router<B: InferenceBackend>(state: AppState<B>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/predict", post(handle_predict::<B>))
        .route("/canary", post(handle_canary::<B>))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Starts the gateway and serves until SIGINT or SIGTERM.
pub async fn serve(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let http = HttpBackend::new(
        config.backend_url.as_str(),
        config.model_name.as_str(),
        config.backend_timeout,
    )?;
    let backend = Retry::new(http, config.backend_max_retries);
    let state = AppState::new(config.api_keys, backend);
    let app = router(state, config.max_body_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(
        addr = %addr,
        backend_url = %config.backend_url,
        model = %config.model_name,
        timeout_secs = config.backend_timeout.as_secs(),
        max_retries = config.backend_max_retries,
        "Inference gateway listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_until(listener, app, shutdown_requested()).await?;
    Ok(())
}

/// Serve `app` until `shutdown` resolves, then stop accepting connections
/// and let in-flight requests finish. `shutdown` yields the name of whatever
/// triggered it, for the logs.
pub async fn serve_until<F>(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = &'static str> + Send + 'static,
{
    let (drain_started_tx, drain_started_rx) = oneshot::channel();
    let shutdown = async move {
        let trigger = shutdown.await;
        info!(trigger, "Shutdown requested, draining in-flight requests");
        let _ = drain_started_tx.send(Instant::now());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    match drain_started_rx.await {
        Ok(started) => info!(
            drain_ms = started.elapsed().as_millis() as u64,
            "Inference gateway stopped"
        ),
        Err(_) => info!("Inference gateway stopped"),
    }
    Ok(())
}

/// Resolves with the signal name on SIGINT or, on unix, SIGTERM. A signal
/// whose handler cannot be installed is logged and never fires.
async fn shutdown_requested() -> &'static str {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(error) => {
                warn!(error = %error, "Cannot listen for SIGINT");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(error) => {
                warn!(error = %error, "Cannot listen for SIGTERM");
                return std::future::pending().await;
            }
        };
        sigterm.recv().await;
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        trigger = interrupt => trigger,
        trigger = terminate => trigger,
    }
}

async fn health() -> &'static str {
    "ok"
}

fn start_request() -> Uuid {
    let request_id = Uuid::new_v4();
    tracing::Span::current().record("request_id", tracing::field::display(request_id));
    request_id
}

fn with_request_id(mut response: Response, request_id: Uuid) -> Response {
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

fn authenticate(keys: &ApiKeySet, headers: &HeaderMap) -> Result<(), GatewayError> {
    if keys.validate_headers(headers) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

#[instrument(
    name = "gateway.predict",
    skip_all,
    fields(request_id = tracing::field::Empty)
)]
async fn handle_predict<B: InferenceBackend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = start_request();
    let response = predict(&state, &headers, body).await.into_response();
    with_request_id(response, request_id)
}

async fn predict<B: InferenceBackend>(
    state: &AppState<B>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    authenticate(&state.keys, headers)?;

    let reply = state.backend.invoke(RouteTarget::Default, body).await?;
    info!(
        backend_status = reply.status().as_u16(),
        predictions = reply.prediction_count(),
        "Relaying backend reply"
    );
    Ok(relay(reply))
}

/// The backend's status and body, byte-for-byte.
fn relay(reply: InferenceResponse) -> Response {
    (
        reply.status(),
        [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        reply.body().clone(),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct CanaryParams {
    version_a: Option<String>,
    version_b: Option<String>,
}

fn parse_version(branch: Branch, raw: Option<&str>) -> Result<ModelVersion, GatewayError> {
    let label = branch.label();
    let raw = raw.ok_or_else(|| GatewayError::Validation(format!("missing query parameter {label}")))?;
    ModelVersion::parse(raw).map_err(|e| GatewayError::Validation(format!("invalid {label}: {e}")))
}

#[instrument(
    name = "gateway.canary",
    skip_all,
    fields(
        request_id = tracing::field::Empty,
        version_a = tracing::field::Empty,
        version_b = tracing::field::Empty,
    )
)]
async fn handle_canary<B: InferenceBackend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    params: Result<Query<CanaryParams>, QueryRejection>,
    body: Bytes,
) -> Response {
    let request_id = start_request();
    let response = compare_versions(&state, &headers, params, body)
        .await
        .into_response();
    with_request_id(response, request_id)
}

async fn compare_versions<B: InferenceBackend>(
    state: &AppState<B>,
    headers: &HeaderMap,
    params: Result<Query<CanaryParams>, QueryRejection>,
    body: Bytes,
) -> Result<CanaryResult, GatewayError> {
    authenticate(&state.keys, headers)?;

    let Query(params) =
        params.map_err(|e| GatewayError::Validation(format!("invalid query string: {e}")))?;
    let version_a = parse_version(Branch::A, params.version_a.as_deref())?;
    let version_b = parse_version(Branch::B, params.version_b.as_deref())?;

    let span = tracing::Span::current();
    span.record("version_a", version_a.get());
    span.record("version_b", version_b.get());

    let result = canary::compare(&state.backend, body, version_a, version_b).await?;
    info!("Canary comparison complete");
    Ok(result)
}

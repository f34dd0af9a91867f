//! Client for the model-serving backend.
//!
//! [`InferenceBackend`] is the seam the HTTP handlers depend on. Production
//! uses [`HttpBackend`] (optionally wrapped in [`Retry`]); tests inject
//! [`MockBackend`](crate::mocks::MockBackend).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde_json::value::RawValue;

use crate::version::RouteTarget;

/// Initial backoff delay for [`Retry`]; doubles on each subsequent attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Issue one inference call against the serving backend.
///
/// `body` is forwarded byte-for-byte.
pub trait InferenceBackend: Send + Sync + Clone + 'static {
    fn invoke(
        &self,
        target: RouteTarget,
        body: Bytes,
    ) -> impl Future<Output = Result<InferenceResponse, BackendError>> + Send;
}

/// Failures surfaced by an [`InferenceBackend`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Connection refused, DNS failure, timeout, or the body could not be read.
    #[error("backend unreachable: {reason}")]
    Unreachable { reason: String, timed_out: bool },

    /// The backend answered, but not with the JSON the gateway expects.
    #[error("backend returned a malformed response (status {status})")]
    MalformedResponse { status: StatusCode, raw_body: String },
}

impl BackendError {
    fn transport(e: reqwest::Error) -> Self {
        Self::Unreachable {
            timed_out: e.is_timeout(),
            reason: e.to_string(),
        }
    }

    fn malformed(status: StatusCode, raw: &[u8]) -> Self {
        Self::MalformedResponse {
            status,
            raw_body: String::from_utf8_lossy(raw).into_owned(),
        }
    }
}

/// A decoded backend reply.
///
/// The raw body is retained so the gateway can relay it unchanged, and the
/// `predictions` field is kept as raw JSON so numeric formatting survives
/// the round trip.
#[derive(Debug, Clone)]
pub struct InferenceResponse {
    status: StatusCode,
    body: Bytes,
    predictions: Option<Box<RawValue>>,
}

impl InferenceResponse {
    /// Classify a backend reply.
    ///
    /// - Body is not JSON → [`BackendError::MalformedResponse`].
    /// - 2xx that is not an object with a `predictions` array →
    ///   [`BackendError::MalformedResponse`].
    /// - Non-2xx with any JSON value → `Ok`, passed through as-is.
    pub fn decode(status: StatusCode, body: Bytes) -> Result<Self, BackendError> {
        let raw: &RawValue =
            serde_json::from_slice(&body).map_err(|_| BackendError::malformed(status, &body))?;

        let predictions = serde_json::from_str::<HashMap<String, Box<RawValue>>>(raw.get())
            .ok()
            .and_then(|mut fields| fields.remove("predictions"))
            .filter(|p| p.get().starts_with('['));

        if status.is_success() && predictions.is_none() {
            return Err(BackendError::malformed(status, &body));
        }

        Ok(Self {
            status,
            body,
            predictions,
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The backend's body, exactly as received.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The raw `predictions` array, if the backend sent one.
    pub fn predictions(&self) -> Option<&RawValue> {
        self.predictions.as_deref()
    }

    /// Number of entries in `predictions`.
    pub fn prediction_count(&self) -> Option<usize> {
        self.predictions().and_then(array_len)
    }

    pub fn into_predictions(self) -> Option<Box<RawValue>> {
        self.predictions
    }
}

/// Length of a raw JSON array, or `None` if `raw` is not an array.
pub(crate) fn array_len(raw: &RawValue) -> Option<usize> {
    serde_json::from_str::<Vec<&RawValue>>(raw.get())
        .ok()
        .map(|items| items.len())
}

/// [`InferenceBackend`] over HTTP, sharing one pooled `reqwest::Client`.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Arc<str>,
    model: Arc<str>,
}

impl HttpBackend {
    /// Build a backend client whose calls each time out after `timeout`.
    pub fn new(
        base_url: impl Into<Arc<str>>,
        model: impl Into<Arc<str>>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, model))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<Arc<str>>,
        model: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    pub fn url_for(&self, target: RouteTarget) -> String {
        target.predict_url(&self.base_url, &self.model)
    }
}

impl InferenceBackend for HttpBackend {
    async fn invoke(
        &self,
        target: RouteTarget,
        body: Bytes,
    ) -> Result<InferenceResponse, BackendError> {
        let url = self.url_for(target);

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(BackendError::transport)?;

        let status = response.status();
        let raw = response.bytes().await.map_err(BackendError::transport)?;

        tracing::debug!(
            url = %url,
            route = %target,
            status = status.as_u16(),
            body_len = raw.len(),
            "Backend replied"
        );

        InferenceResponse::decode(status, raw)
    }
}

/// Retry wrapper with exponential backoff.
///
/// Retries on:
/// - [`BackendError::Unreachable`]
/// - 5xx replies, whether or not their body decoded
///
/// Never retries 4xx replies. `max_retries = 0` makes a single attempt.
#[derive(Clone)]
pub struct Retry<B> {
    inner: B,
    max_retries: u32,
    initial_delay: Duration,
}

impl<B: InferenceBackend> Retry<B> {
    pub fn new(inner: B, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries,
            initial_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

fn is_retryable(result: &Result<InferenceResponse, BackendError>) -> bool {
    match result {
        Ok(resp) => resp.status().is_server_error(),
        Err(BackendError::Unreachable { .. }) => true,
        Err(BackendError::MalformedResponse { status, .. }) => status.is_server_error(),
    }
}

impl<B: InferenceBackend> InferenceBackend for Retry<B> {
    async fn invoke(
        &self,
        target: RouteTarget,
        body: Bytes,
    ) -> Result<InferenceResponse, BackendError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = self.inner.invoke(target, body.clone()).await;

            if !is_retryable(&result) {
                return result;
            }
            if attempts > self.max_retries {
                if self.max_retries > 0 {
                    tracing::warn!(route = %target, attempts, "Backend still failing after all retries");
                }
                return result;
            }

            let delay = self.initial_delay * (1u32 << (attempts - 1).min(31));
            tracing::debug!(
                route = %target,
                attempt = attempts,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis(),
                "Backend call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockBackend, MockReply};
    use crate::version::ModelVersion;

    fn decode(status: u16, body: &str) -> Result<InferenceResponse, BackendError> {
        InferenceResponse::decode(
            StatusCode::from_u16(status).unwrap(),
            Bytes::from(body.to_string()),
        )
    }

    // ── decode ───────────────────────────────────────────────────────────────

    #[test]
    fn decode_success_keeps_raw_predictions() {
        let resp = decode(200, r#"{"predictions":[[0.83],[1e-7]]}"#).unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.predictions().unwrap().get(), "[[0.83],[1e-7]]");
        assert_eq!(resp.prediction_count(), Some(2));
        assert_eq!(resp.body().as_ref(), br#"{"predictions":[[0.83],[1e-7]]}"#);
    }

    #[test]
    fn decode_non_json_is_malformed_with_diagnostics() {
        let err = decode(200, "<html>oops</html>").unwrap_err();
        match err {
            BackendError::MalformedResponse { status, raw_body } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(raw_body, "<html>oops</html>");
            }
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[test]
    fn decode_success_without_predictions_is_malformed() {
        assert!(matches!(
            decode(200, r#"{"outputs":[[0.1]]}"#),
            Err(BackendError::MalformedResponse { .. })
        ));
        assert!(matches!(
            decode(200, r#"{"predictions":null}"#),
            Err(BackendError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn decode_success_with_non_array_predictions_is_malformed() {
        assert!(matches!(
            decode(200, r#"{"predictions":{"a":1}}"#),
            Err(BackendError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn decode_non_success_json_is_passed_through() {
        let resp = decode(404, r#"{"error":"Servable not found for request"}"#).unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(!resp.is_success());
        assert!(resp.predictions().is_none());
        assert_eq!(
            resp.body().as_ref(),
            br#"{"error":"Servable not found for request"}"#
        );
    }

    #[test]
    fn decode_non_success_non_object_json_is_passed_through() {
        let resp = decode(404, r#""model not found""#).unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(resp.predictions().is_none());
        assert_eq!(resp.body().as_ref(), br#""model not found""#);

        let resp = decode(400, r#"["bad"]"#).unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(resp.body().as_ref(), br#"["bad"]"#);
    }

    #[test]
    fn decode_pretty_printed_success() {
        let resp = decode(200, "{\n \"predictions\": [[0.83]\n ]\n}").unwrap();
        assert_eq!(resp.prediction_count(), Some(1));
    }

    #[test]
    fn decode_non_success_non_json_is_malformed() {
        let err = decode(503, "upstream connect error").unwrap_err();
        assert!(matches!(
            err,
            BackendError::MalformedResponse { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE
        ));
    }

    #[test]
    fn decode_json_array_body_is_malformed() {
        assert!(matches!(
            decode(200, "[[0.1]]"),
            Err(BackendError::MalformedResponse { .. })
        ));
    }

    // ── HttpBackend ──────────────────────────────────────────────────────────

    fn backend_for(server: &httpmock::MockServer) -> HttpBackend {
        HttpBackend::new(server.base_url(), "my_model", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn default_target_posts_body_verbatim() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/v1/models/my_model:predict")
                    .header("content-type", "application/json")
                    .body(r#"{"instances":[[0.1,0.2]]}"#);
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"predictions":[[0.83]]}"#);
            })
            .await;

        let resp = backend_for(&server)
            .invoke(RouteTarget::Default, Bytes::from_static(br#"{"instances":[[0.1,0.2]]}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.predictions().unwrap().get(), "[[0.83]]");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn specific_target_uses_versioned_path() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST)
                    .path("/v1/models/my_model/versions/7:predict");
                then.status(200).body(r#"{"predictions":[[0.5]]}"#);
            })
            .await;

        let version = ModelVersion::new(7).unwrap();
        let resp = backend_for(&server)
            .invoke(RouteTarget::Specific(version), Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert_eq!(resp.prediction_count(), Some(1));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_with_json_is_not_an_error() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.any_request();
                then.status(400).body(r#"{"error":"Malformed request"}"#);
            })
            .await;

        let resp = backend_for(&server)
            .invoke(RouteTarget::Default, Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn connection_refused_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let backend = HttpBackend::new(
            format!("http://127.0.0.1:{port}"),
            "my_model",
            Duration::from_secs(2),
        )
        .unwrap();

        let err = backend
            .invoke(RouteTarget::Default, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::Unreachable { timed_out: false, .. }));
    }

    #[tokio::test]
    async fn slow_backend_times_out_as_unreachable() {
        let server = httpmock::MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.any_request();
                then.status(200)
                    .delay(Duration::from_secs(3))
                    .body(r#"{"predictions":[]}"#);
            })
            .await;

        let backend =
            HttpBackend::new(server.base_url(), "my_model", Duration::from_millis(200)).unwrap();

        let err = backend
            .invoke(RouteTarget::Default, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::Unreachable { timed_out: true, .. }));
    }

    // ── Retry ────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn zero_retries_makes_one_attempt() {
        let mock = MockBackend::new();
        mock.reply(RouteTarget::Default, MockReply::Unreachable);

        let result = Retry::new(mock.clone(), 0)
            .invoke(RouteTarget::Default, Bytes::new())
            .await;

        assert!(matches!(result, Err(BackendError::Unreachable { .. })));
        assert_eq!(mock.call_count(RouteTarget::Default), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_exhaust_retries() {
        let mock = MockBackend::new();
        mock.reply(RouteTarget::Default, MockReply::Unreachable);

        let result = Retry::new(mock.clone(), 3)
            .invoke(RouteTarget::Default, Bytes::new())
            .await;

        assert!(result.is_err());
        assert_eq!(mock.call_count(RouteTarget::Default), 4, "1 attempt + 3 retries");
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_5xx() {
        let mock = MockBackend::new();
        mock.reply(RouteTarget::Default, MockReply::json(503, r#"{"error":"loading"}"#));
        mock.reply(RouteTarget::Default, MockReply::json(200, r#"{"predictions":[[1]]}"#));

        let resp = Retry::new(mock.clone(), 2)
            .invoke(RouteTarget::Default, Bytes::new())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(mock.call_count(RouteTarget::Default), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let mock = MockBackend::new();
        mock.reply(RouteTarget::Default, MockReply::json(400, r#"{"error":"bad"}"#));

        let resp = Retry::new(mock.clone(), 3)
            .invoke(RouteTarget::Default, Bytes::new())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(mock.call_count(RouteTarget::Default), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_success_is_not_retried() {
        let mock = MockBackend::new();
        mock.reply(RouteTarget::Default, MockReply::json(200, "not json"));

        let result = Retry::new(mock.clone(), 3)
            .invoke(RouteTarget::Default, Bytes::new())
            .await;

        assert!(matches!(result, Err(BackendError::MalformedResponse { .. })));
        assert_eq!(mock.call_count(RouteTarget::Default), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_attempts() {
        let mock = MockBackend::new();
        mock.reply(RouteTarget::Default, MockReply::Unreachable);

        let start = tokio::time::Instant::now();
        let _ = Retry::new(mock, 2)
            .with_initial_delay(Duration::from_millis(100))
            .invoke(RouteTarget::Default, Bytes::new())
            .await;

        // 100ms + 200ms of backoff between three attempts.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "elapsed {elapsed:?}");
    }
}

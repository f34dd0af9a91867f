//! Canary fan-out: score one request body against two model versions at once.
//!
//! Both backend calls run concurrently on the same bytes. The result is
//! either a complete [`CanaryResult`] or a [`CanaryFailure`] naming the
//! branch that failed; a one-sided comparison is never produced.

use std::fmt;
use std::future::Future;
use std::pin::pin;

use axum::Json;
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use serde_json::value::RawValue;

use crate::backend::{BackendError, InferenceBackend, InferenceResponse, array_len};
use crate::version::{ModelVersion, RouteTarget};

pub const VERSION_A_HEADER: HeaderName = HeaderName::from_static("x-model-version-a");
pub const VERSION_B_HEADER: HeaderName = HeaderName::from_static("x-model-version-b");

/// Which side of the comparison a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    A,
    B,
}

impl Branch {
    /// Key used for this branch in request parameters and response bodies.
    pub fn label(self) -> &'static str {
        match self {
            Self::A => "version_a",
            Self::B => "version_b",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Unreachable,
    MalformedResponse,
    /// The backend answered with a non-2xx status.
    Status(u16),
    /// Both sides answered but with different numbers of predictions.
    Misaligned { version_a: usize, version_b: usize },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => f.write_str("backend unreachable"),
            Self::MalformedResponse => f.write_str("invalid response from backend"),
            Self::Status(status) => write!(f, "backend returned status {status}"),
            Self::Misaligned {
                version_a,
                version_b,
            } => write!(
                f,
                "misaligned predictions ({version_a} for version_a, {version_b} for version_b)"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BranchFailure {
    pub branch: Branch,
    pub version: ModelVersion,
    pub reason: FailureReason,
    /// Diagnostic text for the logs. Never sent to clients.
    pub detail: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", describe(.branches))]
pub struct CanaryFailure {
    branches: Vec<BranchFailure>,
}

fn describe(branches: &[BranchFailure]) -> String {
    branches
        .iter()
        .map(|b| format!("{} (v{}): {}", b.branch.label(), b.version, b.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl CanaryFailure {
    pub fn new(branches: Vec<BranchFailure>) -> Self {
        Self { branches }
    }

    pub fn branches(&self) -> &[BranchFailure] {
        &self.branches
    }
}

/// Predictions from both versions for the same input.
#[derive(Debug)]
pub struct CanaryResult {
    version_a: ModelVersion,
    version_b: ModelVersion,
    predictions_a: Box<RawValue>,
    predictions_b: Box<RawValue>,
}

#[derive(Serialize)]
struct CanaryBody<'a> {
    version_a: &'a RawValue,
    version_b: &'a RawValue,
}

impl CanaryResult {
    pub fn version_a(&self) -> ModelVersion {
        self.version_a
    }

    pub fn version_b(&self) -> ModelVersion {
        self.version_b
    }

    pub fn predictions_a(&self) -> &RawValue {
        &self.predictions_a
    }

    pub fn predictions_b(&self) -> &RawValue {
        &self.predictions_b
    }
}

impl IntoResponse for CanaryResult {
    fn into_response(self) -> Response {
        let body = CanaryBody {
            version_a: &self.predictions_a,
            version_b: &self.predictions_b,
        };
        let mut response = Json(body).into_response();
        let headers = response.headers_mut();
        headers.insert(VERSION_A_HEADER, HeaderValue::from(self.version_a.get()));
        headers.insert(VERSION_B_HEADER, HeaderValue::from(self.version_b.get()));
        response
    }
}

fn check_branch(
    branch: Branch,
    version: ModelVersion,
    result: Result<InferenceResponse, BackendError>,
) -> Result<Box<RawValue>, BranchFailure> {
    let failure = |reason, detail| BranchFailure {
        branch,
        version,
        reason,
        detail,
    };

    match result {
        Ok(resp) if resp.is_success() => resp
            .into_predictions()
            .ok_or_else(|| failure(FailureReason::MalformedResponse, None)),
        Ok(resp) => Err(failure(
            FailureReason::Status(resp.status().as_u16()),
            Some(String::from_utf8_lossy(resp.body()).into_owned()),
        )),
        Err(BackendError::Unreachable { reason, .. }) => {
            Err(failure(FailureReason::Unreachable, Some(reason)))
        }
        Err(BackendError::MalformedResponse { raw_body, .. }) => {
            Err(failure(FailureReason::MalformedResponse, Some(raw_body)))
        }
    }
}

type BranchOutcome = Result<Box<RawValue>, BranchFailure>;

enum Settled {
    A(BranchOutcome),
    B(BranchOutcome),
}

/// Output of `branch` if it completes on this poll, without waiting.
async fn settled_now<F>(branch: &mut F) -> Option<F::Output>
where
    F: Future + Unpin,
{
    tokio::select! {
        biased;
        outcome = branch => Some(outcome),
        _ = std::future::ready(()) => None,
    }
}

/// Score `body` against `version_a` and `version_b` concurrently.
///
/// Latency is bounded by the slower branch. The first branch to fail ends the
/// comparison: the other branch is reported too if it has already failed,
/// otherwise its in-flight call is dropped. Results are labelled by the
/// branch they were requested for, never by completion order.
pub async fn compare<B: InferenceBackend>(
    backend: &B,
    body: Bytes,
    version_a: ModelVersion,
    version_b: ModelVersion,
) -> Result<CanaryResult, CanaryFailure> {
    let body_a = body.clone();
    let mut branch_a = pin!(async move {
        let result = backend.invoke(RouteTarget::Specific(version_a), body_a).await;
        check_branch(Branch::A, version_a, result)
    });
    let mut branch_b = pin!(async move {
        let result = backend.invoke(RouteTarget::Specific(version_b), body).await;
        check_branch(Branch::B, version_b, result)
    });

    let first = tokio::select! {
        biased;
        outcome = &mut branch_a => Settled::A(outcome),
        outcome = &mut branch_b => Settled::B(outcome),
    };

    let (predictions_a, predictions_b) = match first {
        Settled::A(Ok(a)) => match branch_b.await {
            Ok(b) => (a, b),
            Err(failed_b) => return Err(CanaryFailure::new(vec![failed_b])),
        },
        Settled::B(Ok(b)) => match branch_a.await {
            Ok(a) => (a, b),
            Err(failed_a) => return Err(CanaryFailure::new(vec![failed_a])),
        },
        Settled::A(Err(failed_a)) => {
            let mut failed = vec![failed_a];
            if let Some(Err(failed_b)) = settled_now(&mut branch_b).await {
                failed.push(failed_b);
            }
            return Err(CanaryFailure::new(failed));
        }
        Settled::B(Err(failed_b)) => {
            let mut failed = Vec::with_capacity(2);
            if let Some(Err(failed_a)) = settled_now(&mut branch_a).await {
                failed.push(failed_a);
            }
            failed.push(failed_b);
            return Err(CanaryFailure::new(failed));
        }
    };

    if let (Some(len_a), Some(len_b)) = (array_len(&predictions_a), array_len(&predictions_b)) {
        if len_a != len_b {
            let reason = FailureReason::Misaligned {
                version_a: len_a,
                version_b: len_b,
            };
            return Err(CanaryFailure::new(vec![
                BranchFailure {
                    branch: Branch::A,
                    version: version_a,
                    reason: reason.clone(),
                    detail: None,
                },
                BranchFailure {
                    branch: Branch::B,
                    version: version_b,
                    reason,
                    detail: None,
                },
            ]));
        }
    }

    Ok(CanaryResult {
        version_a,
        version_b,
        predictions_a,
        predictions_b,
    })
}

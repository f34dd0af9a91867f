//! Scripted [`InferenceBackend`] for tests that don't need a real serving process.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! trogon-inference-gateway = { path = "...", features = ["test-support"] }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;

use crate::backend::{BackendError, InferenceBackend, InferenceResponse};
use crate::version::RouteTarget;

/// What the mock does for one call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Reply with `status` and `body`; the body goes through the same
    /// decoding as a real backend reply.
    Respond { status: u16, body: String },
    /// Fail as if the connection had been refused.
    Unreachable,
}

impl MockReply {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self::Respond {
            status,
            body: body.into(),
        }
    }

    pub fn predictions(predictions: &str) -> Self {
        Self::json(200, format!(r#"{{"predictions":{predictions}}}"#))
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub target: RouteTarget,
    pub body: Bytes,
}

#[derive(Default)]
struct Script {
    replies: VecDeque<MockReply>,
    delay: Duration,
}

#[derive(Default)]
struct State {
    scripts: HashMap<RouteTarget, Script>,
    calls: Vec<RecordedCall>,
}

/// Replays queued replies per [`RouteTarget`] and records every call.
///
/// Replies are consumed in order; the last one keeps being returned once the
/// queue is down to a single entry. A target with nothing queued is
/// unreachable.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a reply for `target`.
    pub fn reply(&self, target: RouteTarget, reply: MockReply) -> &Self {
        self.lock()
            .scripts
            .entry(target)
            .or_default()
            .replies
            .push_back(reply);
        self
    }

    /// Make every call to `target` take `delay` before replying.
    pub fn delay(&self, target: RouteTarget, delay: Duration) -> &Self {
        self.lock().scripts.entry(target).or_default().delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, target: RouteTarget) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.target == target)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }

    fn next(&self, target: RouteTarget, body: Bytes) -> (Option<MockReply>, Duration) {
        let mut state = self.lock();
        state.calls.push(RecordedCall { target, body });
        match state.scripts.get_mut(&target) {
            Some(script) => {
                let reply = if script.replies.len() > 1 {
                    script.replies.pop_front()
                } else {
                    script.replies.front().cloned()
                };
                (reply, script.delay)
            }
            None => (None, Duration::ZERO),
        }
    }
}

impl InferenceBackend for MockBackend {
    async fn invoke(
        &self,
        target: RouteTarget,
        body: Bytes,
    ) -> Result<InferenceResponse, BackendError> {
        let (reply, delay) = self.next(target, body);

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Some(MockReply::Respond { status, body }) => {
                let status =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                InferenceResponse::decode(status, Bytes::from(body))
            }
            Some(MockReply::Unreachable) | None => Err(BackendError::Unreachable {
                reason: format!("no route to mock backend for {target}"),
                timed_out: false,
            }),
        }
    }
}

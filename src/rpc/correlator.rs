//! Pending-call table.
//!
//! A call registers a oneshot slot under a fresh correlation id, sends the
//! envelope and waits with a deadline. The slot is removed on every exit
//! path: response, timeout, connection loss, or the waiting future being
//! dropped. A late response for a removed id is logged and discarded.

use crate::transport::{LinkId, Outbox};
use orrery_protocol::{AgentType, Call, Method, Response, RpcError};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    #[error("Call '{method}' timed out after {timeout:?}")]
    TimedOut { method: String, timeout: Duration },

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Not connected")]
    NotConnected,

    #[error("No connected agent of type '{0}'")]
    NoAgent(AgentType),

    #[error("Remote error: {0}")]
    Remote(RpcError),

    #[error("Malformed result: {0}")]
    MalformedResult(String),
}

type Outcome = Result<Value, CallError>;

struct PendingCall {
    method: Method,
    link: LinkId,
    created_at: Instant,
    slot: oneshot::Sender<Outcome>,
}

/// Tracks outbound calls until their response arrives.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<String, PendingCall>>,
}

/// Removes the entry when the waiting future finishes or is dropped.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.pending.lock().remove(&self.id);
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `method` over `outbox` and wait up to `timeout` for its response.
    pub async fn call(
        &self,
        outbox: &Outbox,
        method: Method,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        let (tx, rx) = oneshot::channel();
        let id = self.register(method, outbox.link(), tx);
        let guard = PendingGuard {
            correlator: self,
            id: id.clone(),
        };

        tracing::debug!(correlation_id = %id, method = %method, link = outbox.link(), "Sending call");
        if outbox.send(Call::new(id, method, params)).is_err() {
            return Err(CallError::NotConnected);
        }

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CallError::ConnectionLost(
                "pending call dropped before a response arrived".to_string(),
            )),
            Err(_) => {
                tracing::warn!(
                    correlation_id = %guard.id,
                    method = %method,
                    timeout_ms = timeout.as_millis() as u64,
                    "Call timed out"
                );
                Err(CallError::TimedOut {
                    method: method.to_string(),
                    timeout,
                })
            }
        };
        drop(guard);
        outcome
    }

    fn register(&self, method: Method, link: LinkId, slot: oneshot::Sender<Outcome>) -> String {
        let mut pending = self.pending.lock();
        let mut id = uuid::Uuid::new_v4().to_string();
        while pending.contains_key(&id) {
            id = uuid::Uuid::new_v4().to_string();
        }
        pending.insert(
            id.clone(),
            PendingCall {
                method,
                link,
                created_at: Instant::now(),
                slot,
            },
        );
        id
    }

    /// Deliver a response to its waiting call. Returns false when no call
    /// with that id is pending.
    pub fn resolve(&self, response: Response) -> bool {
        let Some(call) = self.pending.lock().remove(&response.id) else {
            tracing::warn!(
                correlation_id = %response.id,
                "Discarding response with no pending call"
            );
            return false;
        };

        tracing::debug!(
            correlation_id = %response.id,
            method = %call.method,
            elapsed_ms = call.created_at.elapsed().as_millis() as u64,
            ok = response.outcome.is_ok(),
            "Resolved call"
        );
        // The waiter may have just timed out; the result is dropped with it.
        let _ = call.slot.send(response.outcome.map_err(CallError::Remote));
        true
    }

    /// Fail every call sent over `link`. Returns how many were failed.
    pub fn fail_link(&self, link: LinkId, reason: &str) -> usize {
        let failed: Vec<PendingCall> = {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, call)| call.link == link)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        let count = failed.len();
        for call in failed {
            let _ = call
                .slot
                .send(Err(CallError::ConnectionLost(reason.to_string())));
        }
        if count > 0 {
            tracing::warn!(link, count, reason, "Failed pending calls for lost connection");
        }
        count
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

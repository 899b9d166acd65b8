//! Worker-side handling of coordinator calls and notifications.

use super::harness::Harness;
use super::registry::HandlerRegistry;
use crate::rpc::{reply, InboundHandler};
use crate::transport::{Frame, Outbox, Session};
use async_trait::async_trait;
use chrono::Utc;
use orrery_protocol::{Call, Method, Notification, RpcError};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Worker side of the protocol: tasks go to the harness, control methods
/// are answered inline.
pub struct WorkerInbound {
    session: Arc<Session>,
    registry: Arc<HandlerRegistry>,
    harness: Harness,
    shutdown: CancellationToken,
}

impl WorkerInbound {
    pub fn new(
        session: Arc<Session>,
        registry: Arc<HandlerRegistry>,
        harness: Harness,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            registry,
            harness,
            shutdown,
        }
    }
}

#[async_trait]
impl InboundHandler for WorkerInbound {
    async fn handle_call(&self, method: Method, call: Call, outbox: &Outbox) {
        let identity = self.session.identity();
        let outcome = match method {
            Method::TaskExecute => {
                self.harness.enqueue(call, outbox.clone());
                return;
            }
            Method::AgentPing => Ok(json!({
                "pong": true,
                "agent_id": identity.id,
                "timestamp": Utc::now(),
            })),
            Method::AgentStatus => Ok(json!({
                "agent_id": identity.id,
                "agent_type": identity.agent_type,
                "capabilities": identity.capabilities,
                "connection": self.session.connection(),
                "handlers": self.registry.task_types(),
                "queue_depth": self.harness.queue_depth(),
            })),
            Method::AgentShutdown => {
                tracing::info!(agent_id = %identity.id, "Shutdown requested by coordinator");
                reply(
                    outbox,
                    &call,
                    Ok(json!({"acknowledged": true, "agent_id": identity.id})),
                );
                // Queued after the acknowledgement, so the reply is written first.
                self.shutdown.cancel();
                return;
            }
            Method::ResearchSubmit | Method::ResearchStatus => {
                Err(RpcError::method_not_found(method.as_str()))
            }
        };
        reply(outbox, &call, outcome);
    }

    async fn handle_notification(&self, notification: Notification, outbox: &Outbox) {
        match notification {
            Notification::RegistrationAck {
                agent_id,
                accepted: true,
                ..
            } => {
                tracing::info!(agent_id = %agent_id, "Registration accepted");
            }
            Notification::RegistrationAck {
                agent_id, reason, ..
            } => {
                tracing::warn!(
                    agent_id = %agent_id,
                    reason = reason.as_deref().unwrap_or("none given"),
                    "Registration refused, reconnecting"
                );
                // Dropping the link makes the session reconnect and register again.
                let _ = outbox.send_frame(Frame::Close);
            }
            Notification::HeartbeatAck { .. } => {
                tracing::trace!("Heartbeat acknowledged");
            }
            Notification::Ping { .. } => {
                let _ = outbox.send(Notification::Pong {
                    timestamp: Utc::now(),
                });
            }
            other => {
                tracing::debug!(kind = other.kind(), "Ignoring notification");
            }
        }
    }
}

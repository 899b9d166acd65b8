//! Coordinator end of the worker connections.
//!
//! Each accepted socket gets an outbox with its own writer task and a receive
//! loop that feeds the shared dispatcher. Registration, heartbeats and
//! goodbyes maintain the [`AgentDirectory`]; a closed socket removes its
//! agents and fails every call still waiting on it. Clients that submit
//! research over the socket receive progress and completion notifications on
//! the same link.

use super::directory::AgentDirectory;
use super::orchestrator::{OrchestrationEvent, Orchestrator};
use crate::rpc::{reply, Correlator, Dispatcher, InboundHandler};
use crate::transport::{Frame, LinkId, Outbox};
use crate::types::{ResearchRequest, SubmitResponse};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use orrery_protocol::{AgentType, Call, Method, Notification, RpcError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Hub {
    directory: Arc<AgentDirectory>,
    correlator: Arc<Correlator>,
    orchestrator: Arc<Orchestrator>,
    watchers: Mutex<HashMap<String, Outbox>>,
    closing: CancellationToken,
}

impl Hub {
    pub fn new(
        directory: Arc<AgentDirectory>,
        correlator: Arc<Correlator>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            directory,
            correlator,
            orchestrator,
            watchers: Mutex::new(HashMap::new()),
            closing: CancellationToken::new(),
        }
    }

    /// Send a close frame on every open socket and stop their receive loops.
    pub fn close_all(&self) {
        self.closing.cancel();
    }

    /// Serve one accepted socket until it closes.
    pub async fn serve_socket(self: Arc<Self>, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();
        let (outbox, mut frames) = Outbox::channel();
        let link = outbox.link();
        tracing::debug!(link, "Worker socket opened");

        let writer = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let message = match frame {
                    Frame::Text(text) => Message::Text(text.into()),
                    Frame::Ping(payload) => Message::Ping(payload.into()),
                    Frame::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        let dispatcher = Dispatcher::new(self.correlator.clone(), self.clone());
        loop {
            let message = tokio::select! {
                _ = self.closing.cancelled() => {
                    let _ = outbox.send_frame(Frame::Close);
                    break;
                }
                message = stream.next() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            match message {
                Ok(Message::Text(text)) => {
                    dispatcher.dispatch(text.as_str(), &outbox).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Binary(_)) => tracing::debug!(link, "Ignoring binary frame"),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(link, error = %e, "Worker socket error");
                    break;
                }
            }
        }

        if self.closing.is_cancelled() {
            let _ = tokio::time::timeout(Duration::from_millis(250), writer).await;
        } else {
            writer.abort();
        }
        self.link_closed(link);
    }

    fn link_closed(&self, link: LinkId) {
        let removed = self.directory.remove_link(link);
        let failed = self.correlator.fail_link(link, "worker connection closed");
        self.watchers.lock().retain(|_, watcher| watcher.link() != link);
        tracing::info!(link, agents = ?removed, failed_calls = failed, "Worker socket closed");
    }

    /// Forward orchestration events to the links that submitted the tasks.
    pub fn spawn_event_forwarder(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let mut events = self.orchestrator.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => hub.forward(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event forwarder lagged, some progress updates were not delivered");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn forward(&self, event: OrchestrationEvent) {
        let task_id = event.task_id().to_string();
        let watcher = match &event {
            OrchestrationEvent::Progress(_) => self.watchers.lock().get(&task_id).cloned(),
            OrchestrationEvent::Completed(_) => self.watchers.lock().remove(&task_id),
        };
        let Some(watcher) = watcher else {
            return;
        };

        let notification = match event {
            OrchestrationEvent::Progress(update) => Notification::ResearchProgress(update),
            OrchestrationEvent::Completed(report) => Notification::ResearchCompleted(report),
        };
        if let Err(e) = watcher.send(notification) {
            tracing::debug!(task_id = %task_id, error = %e, "Submitter went away");
        }
    }

    /// Periodically evict workers that stopped heartbeating.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        max_silence: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let period = (max_silence / 2).max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                for record in hub.directory.evict_stale(max_silence) {
                    let link = record.link();
                    hub.correlator.fail_link(link, "agent stopped heartbeating");
                    let closed = record.close_link();
                    tracing::warn!(
                        agent_id = %record.agent_id,
                        agent_type = %record.agent_type,
                        link,
                        closed,
                        "Evicted silent agent"
                    );
                }
            }
        })
    }

    fn submit(&self, call: &Call, outbox: &Outbox) -> Result<Value, RpcError> {
        let request: ResearchRequest = serde_json::from_value(call.params.clone())
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;

        let submission = self
            .orchestrator
            .submit_observed(request, |task_id| {
                self.watchers
                    .lock()
                    .insert(task_id.to_string(), outbox.clone());
            })
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;

        let task_id = submission.task.as_ref().map(|task| task.task_id.clone());
        let response = SubmitResponse {
            status: task_id.as_deref().and_then(|id| self.orchestrator.status(id)),
            task_id,
            admission: submission.decision,
        };
        serde_json::to_value(response).map_err(|e| RpcError::internal(e.to_string()))
    }

    fn agents_by_type(&self) -> serde_json::Map<String, Value> {
        AgentType::ALL
            .into_iter()
            .map(|agent_type| (agent_type, self.directory.count_of(agent_type)))
            .filter(|(_, count)| *count > 0)
            .map(|(agent_type, count)| (agent_type.to_string(), json!(count)))
            .collect()
    }

    fn research_status(&self, call: &Call) -> Result<Value, RpcError> {
        let task_id = call
            .params
            .get("task_id")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("missing task_id"))?;
        let status = self
            .orchestrator
            .status(task_id)
            .ok_or_else(|| RpcError::invalid_params(format!("unknown task '{task_id}'")))?;
        serde_json::to_value(status).map_err(|e| RpcError::internal(e.to_string()))
    }
}

#[async_trait]
impl InboundHandler for Hub {
    async fn handle_call(&self, method: Method, call: Call, outbox: &Outbox) {
        let outcome = match method {
            Method::ResearchSubmit => self.submit(&call, outbox),
            Method::ResearchStatus => self.research_status(&call),
            Method::AgentPing => Ok(json!({
                "pong": true,
                "role": "coordinator",
                "timestamp": Utc::now(),
            })),
            Method::AgentStatus => Ok(json!({
                "role": "coordinator",
                "connected_agents": self.directory.len(),
                "agents_by_type": self.agents_by_type(),
                "active_contexts": self.orchestrator.active_count(),
                "pending_calls": self.correlator.pending_count(),
            })),
            Method::TaskExecute | Method::AgentShutdown => {
                Err(RpcError::method_not_found(method.as_str()))
            }
        };
        reply(outbox, &call, outcome);
    }

    async fn handle_notification(&self, notification: Notification, outbox: &Outbox) {
        match notification {
            Notification::AgentRegister(registration) => {
                let agent_id = registration.agent_id.clone();
                tracing::info!(
                    agent_id = %agent_id,
                    agent_type = %registration.agent_type,
                    capabilities = ?registration.capabilities,
                    link = outbox.link(),
                    "Agent registered"
                );
                self.directory.register(registration, outbox.clone());
                let ack = Notification::RegistrationAck {
                    agent_id,
                    accepted: true,
                    reason: None,
                };
                if let Err(e) = outbox.send(ack) {
                    tracing::warn!(error = %e, "Could not acknowledge registration");
                }
            }
            Notification::Heartbeat { agent_id, .. } => {
                if self.directory.touch(&agent_id) {
                    let _ = outbox.send(Notification::HeartbeatAck {
                        timestamp: Utc::now(),
                    });
                } else {
                    tracing::debug!(agent_id = %agent_id, "Heartbeat from unregistered agent");
                    let _ = outbox.send(Notification::RegistrationAck {
                        agent_id,
                        accepted: false,
                        reason: Some("unknown agent, register again".to_string()),
                    });
                }
            }
            Notification::AgentUnregister { agent_id } => {
                if self.directory.unregister(&agent_id).is_some() {
                    tracing::info!(agent_id = %agent_id, "Agent unregistered");
                }
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

//! Worker-side session: one persistent connection to the coordinator.
//!
//! The session connects with bounded exponential backoff, registers before
//! anything else is written, keeps the link alive with heartbeats and
//! ping/pong, routes inbound frames through a [`Dispatcher`], and reconnects
//! after a drop until it is shut down.

use super::{Frame, Outbox, TransportError};
use crate::rpc::{CallError, Correlator, Dispatcher, InboundHandler};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use orrery_protocol::{AgentIdentity, Envelope, Method, Notification, Registration, ServiceInfo};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures::stream::SplitSink<WsStream, Message>;

/// Delay before retrying after failed attempt number `attempt` (0-based).
/// Grows as `base * 2^attempt` and stops growing after the fourth attempt.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.pow(attempt.min(3))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of the session's connection.
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub state: ConnectionState,
    /// Attempt number of the current or last connection try.
    pub retry_attempt: u32,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Successful connections made so far, including the first.
    pub connections: u64,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            retry_attempt: 0,
            last_heartbeat_at: None,
            connected_at: None,
            connections: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Coordinator WebSocket URL.
    pub url: String,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub heartbeat_interval: Duration,
    pub ping_timeout: Duration,
    /// How long shutdown waits for the goodbye to be written.
    pub unregister_timeout: Duration,
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            unregister_timeout: Duration::from_millis(500),
        }
    }
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

pub struct Session {
    identity: AgentIdentity,
    service_info: Option<ServiceInfo>,
    config: SessionConfig,
    correlator: Arc<Correlator>,
    connection: RwLock<Connection>,
    outbox: RwLock<Option<Outbox>>,
    shutdown: CancellationToken,
}

impl Session {
    pub fn new(
        identity: AgentIdentity,
        service_info: Option<ServiceInfo>,
        config: SessionConfig,
        correlator: Arc<Correlator>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            identity,
            service_info,
            config,
            correlator,
            connection: RwLock::new(Connection::default()),
            outbox: RwLock::new(None),
            shutdown,
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn connection(&self) -> Connection {
        self.connection.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.read().state == ConnectionState::Connected
    }

    pub fn outbox(&self) -> Option<Outbox> {
        self.outbox.read().clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Call a method on the coordinator.
    pub async fn call(
        &self,
        method: Method,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        let outbox = self.outbox().ok_or(CallError::NotConnected)?;
        self.correlator.call(&outbox, method, params, timeout).await
    }

    pub fn notify(&self, notification: Notification) -> Result<(), TransportError> {
        self.outbox()
            .ok_or(TransportError::Closed)?
            .send(notification)
    }

    /// Connect, serve, and reconnect until shutdown. Returns an error only
    /// when a connection cannot be (re)established within the retry bound.
    pub async fn run<H>(&self, dispatcher: &Dispatcher<H>) -> Result<(), TransportError>
    where
        H: InboundHandler + ?Sized,
    {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            let stream = match self.connect().await {
                Ok(stream) => stream,
                Err(TransportError::Closed) if self.shutdown.is_cancelled() => return Ok(()),
                Err(e) => return Err(e),
            };

            match self.serve(stream, dispatcher).await {
                SessionEnd::Shutdown => {
                    tracing::info!(agent_id = %self.identity.id, "Session shut down");
                    return Ok(());
                }
                SessionEnd::Lost(reason) => {
                    tracing::warn!(agent_id = %self.identity.id, reason = %reason, "Connection lost, reconnecting");
                }
            }
        }
    }

    async fn connect(&self) -> Result<WsStream, TransportError> {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            {
                let mut connection = self.connection.write();
                connection.state = ConnectionState::Connecting;
                connection.retry_attempt = attempt;
            }
            tracing::debug!(url = %self.config.url, attempt, "Connecting to coordinator");

            match tokio_tungstenite::connect_async(self.config.url.as_str()).await {
                Ok((stream, _)) => return Ok(stream),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt + 1 == attempts {
                        break;
                    }
                    let delay = backoff_delay(self.config.base_delay, attempt);
                    tracing::warn!(
                        url = %self.config.url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "Connection attempt failed"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(TransportError::Closed),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.connection.write().state = ConnectionState::Disconnected;
        tracing::error!(url = %self.config.url, attempts, error = %last_error, "Giving up on coordinator");
        Err(TransportError::ConnectionExhausted {
            attempts,
            last_error,
        })
    }

    async fn serve<H>(&self, stream: WsStream, dispatcher: &Dispatcher<H>) -> SessionEnd
    where
        H: InboundHandler + ?Sized,
    {
        let (mut sink, mut source) = stream.split();

        // Registration is written straight to the socket so it is always the
        // first frame, ahead of anything queued on the outbox.
        let registration = Envelope::from(Notification::AgentRegister(Registration::from_identity(
            &self.identity,
            self.service_info.clone(),
        )));
        let sent = match registration.encode() {
            Ok(text) => sink.send(Message::Text(text)).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = sent {
            self.connection.write().state = ConnectionState::Disconnected;
            return SessionEnd::Lost(format!("registration failed: {reason}"));
        }

        let (outbox, outgoing) = Outbox::channel();
        let link = outbox.link();
        let mut writer = tokio::spawn(write_frames(sink, outgoing));
        *self.outbox.write() = Some(outbox.clone());
        {
            let mut connection = self.connection.write();
            connection.state = ConnectionState::Connected;
            connection.connected_at = Some(Utc::now());
            connection.connections += 1;
        }
        tracing::info!(
            agent_id = %self.identity.id,
            agent_type = %self.identity.agent_type,
            url = %self.config.url,
            link,
            "Connected and registered"
        );

        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        let mut pong_deadline: Option<Instant> = None;

        let end = loop {
            let deadline = pong_deadline;
            let pong_wait = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break SessionEnd::Shutdown,
                _ = pong_wait => {
                    let err = TransportError::PingTimeout(self.config.ping_timeout);
                    break SessionEnd::Lost(err.to_string());
                }
                _ = ticker.tick() => {
                    if outbox.send(Notification::heartbeat(self.identity.id.clone())).is_err() {
                        break SessionEnd::Lost("writer closed".to_string());
                    }
                    if pong_deadline.is_none() && outbox.send_frame(Frame::Ping(Vec::new())).is_ok() {
                        pong_deadline = Some(Instant::now() + self.config.ping_timeout);
                    }
                    self.connection.write().last_heartbeat_at = Some(Utc::now());
                    tracing::trace!(agent_id = %self.identity.id, "Heartbeat sent");
                }
                result = &mut writer => {
                    let reason = match result {
                        Ok(Err(e)) => e,
                        _ => "writer stopped".to_string(),
                    };
                    break SessionEnd::Lost(reason);
                }
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        dispatcher.dispatch(&text, &outbox).await;
                    }
                    Some(Ok(Message::Pong(_))) => pong_deadline = None,
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!(link, "Ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break SessionEnd::Lost("closed by coordinator".to_string());
                    }
                    Some(Err(e)) => break SessionEnd::Lost(e.to_string()),
                },
            }
        };

        *self.outbox.write() = None;

        if matches!(end, SessionEnd::Shutdown) && !writer.is_finished() {
            let goodbye = Notification::AgentUnregister {
                agent_id: self.identity.id.clone(),
            };
            let _ = outbox.send(goodbye);
            let _ = outbox.send_frame(Frame::Close);
            if tokio::time::timeout(self.config.unregister_timeout, &mut writer)
                .await
                .is_err()
            {
                tracing::debug!(agent_id = %self.identity.id, "Unregister not flushed before timeout");
            }
        }
        writer.abort();

        self.connection.write().state = ConnectionState::Disconnected;
        let reason = match &end {
            SessionEnd::Shutdown => "session shut down",
            SessionEnd::Lost(reason) => reason.as_str(),
        };
        self.correlator.fail_link(link, reason);
        end
    }
}

async fn write_frames(
    mut sink: WsSink,
    mut frames: mpsc::UnboundedReceiver<Frame>,
) -> Result<(), String> {
    while let Some(frame) = frames.recv().await {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Ping(payload) => Message::Ping(payload),
            Frame::Close => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
        };
        sink.send(message).await.map_err(|e| e.to_string())?;
    }
    Ok(())
}

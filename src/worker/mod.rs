//! Worker role: one agent process connected to the coordinator.

pub mod harness;
pub mod health;
pub mod protocol;
pub mod registry;

pub use harness::Harness;
pub use protocol::WorkerInbound;
pub use registry::{HandlerError, HandlerRegistry, TaskHandler, TaskRequest};

use crate::rpc::{Correlator, Dispatcher};
use crate::transport::{discover_coordinator, Session, SessionConfig};
use crate::types::{AppError, Result};
use crate::utils::toml_config::WorkerConfig;
use orrery_protocol::{AgentIdentity, ServiceInfo};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

impl SessionConfig {
    pub fn from_worker_config(url: impl Into<String>, settings: &WorkerConfig) -> Self {
        Self {
            url: url.into(),
            max_retries: settings.max_connect_retries,
            base_delay: Duration::from_millis(settings.reconnect_base_delay_ms),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs),
            ping_timeout: Duration::from_secs(settings.ping_timeout_secs),
            unregister_timeout: Duration::from_millis(settings.unregister_timeout_ms),
        }
    }
}

pub struct WorkerRuntime {
    identity: AgentIdentity,
    registry: Arc<HandlerRegistry>,
    settings: WorkerConfig,
    shutdown: CancellationToken,
}

impl WorkerRuntime {
    /// Fails when an advertised capability has no handler.
    pub fn new(
        identity: AgentIdentity,
        registry: HandlerRegistry,
        settings: WorkerConfig,
    ) -> Result<Self> {
        registry.validate_for(&identity)?;
        Ok(Self {
            identity,
            registry: Arc::new(registry),
            settings,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Cancel to stop the worker gracefully.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Discover the coordinator and serve until shutdown. Returns an error
    /// when the coordinator stays unreachable past the retry bound.
    pub async fn run(self) -> Result<()> {
        let probe_timeout = Duration::from_millis(self.settings.probe_timeout_ms);
        let url = discover_coordinator(&self.settings.coordinator_urls, probe_timeout).await?;

        let service_info = self.settings.health_port.map(|port| ServiceInfo {
            port,
            health_endpoint: "/health".to_string(),
        });
        let correlator = Arc::new(Correlator::new());
        let session = Arc::new(Session::new(
            self.identity.clone(),
            service_info,
            SessionConfig::from_worker_config(url, &self.settings),
            correlator.clone(),
            self.shutdown.clone(),
        ));

        let (harness, consumer) = Harness::start(
            self.settings.queue_capacity,
            self.registry.clone(),
            self.identity.agent_type,
            self.shutdown.clone(),
        );

        let health_server = match self.settings.health_port {
            Some(port) => Some(self.spawn_health_server(port, session.clone()).await?),
            None => None,
        };

        let inbound = Arc::new(WorkerInbound::new(
            session.clone(),
            self.registry.clone(),
            harness,
            self.shutdown.clone(),
        ));
        let dispatcher = Dispatcher::new(correlator, inbound);

        tracing::info!(
            agent_id = %self.identity.id,
            agent_type = %self.identity.agent_type,
            capabilities = ?self.identity.capabilities,
            "Worker starting"
        );
        let result = session.run(&dispatcher).await;

        self.shutdown.cancel();
        let _ = consumer.await;
        if let Some(server) = health_server {
            let _ = server.await;
        }

        result.map_err(AppError::from)
    }

    async fn spawn_health_server(
        &self,
        port: u16,
        session: Arc<Session>,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| AppError::Configuration(format!("cannot bind health port {port}: {e}")))?;
        tracing::info!(port, "Worker health endpoint listening");

        let shutdown = self.shutdown.clone();
        Ok(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, health::router(session))
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "Health server failed");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_protocol::AgentType;

    #[test]
    fn runtime_rejects_capability_without_handler() {
        let identity = AgentIdentity::new("w", AgentType::Planner, ["plan_research"]);
        let result = WorkerRuntime::new(identity, HandlerRegistry::new(), WorkerConfig::default());
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[test]
    fn session_config_follows_worker_settings() {
        let settings = WorkerConfig {
            max_connect_retries: 2,
            reconnect_base_delay_ms: 50,
            heartbeat_interval_secs: 7,
            ping_timeout_secs: 3,
            unregister_timeout_ms: 120,
            ..WorkerConfig::default()
        };
        let config = SessionConfig::from_worker_config("ws://hub/ws", &settings);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_delay, Duration::from_millis(50));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(7));
        assert_eq!(config.ping_timeout, Duration::from_secs(3));
        assert_eq!(config.unregister_timeout, Duration::from_millis(120));
    }
}

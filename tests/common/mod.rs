//! Shared fixtures for integration tests.
#![allow(dead_code)]

use orrery::agents::{reference_identity, reference_registry};
use orrery::types::CoordinatorHealth;
use orrery::utils::toml_config::{OrreryConfig, OrreryConfigManager, WorkerConfig};
use orrery::{AppState, WorkerRuntime};
use orrery_protocol::AgentType;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Config with timings short enough for tests.
pub fn test_config() -> OrreryConfig {
    let mut config = OrreryConfig::default();
    config.coordinator.agent_timeout_secs = 30;
    config.orchestration.stage_timeout_secs = 5;
    config.orchestration.cleanup_grace_secs = 30;
    config.worker = worker_settings(Vec::new());
    config
}

pub fn worker_settings(coordinator_urls: Vec<String>) -> WorkerConfig {
    WorkerConfig {
        coordinator_urls,
        max_connect_retries: 3,
        reconnect_base_delay_ms: 20,
        heartbeat_interval_secs: 1,
        ping_timeout_secs: 5,
        probe_timeout_ms: 500,
        queue_capacity: 16,
        health_port: None,
        unregister_timeout_ms: 200,
    }
}

pub struct TestCoordinator {
    pub addr: SocketAddr,
    pub state: AppState,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<orrery::Result<()>>,
}

impl TestCoordinator {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn health(&self) -> CoordinatorHealth {
        reqwest::get(format!("{}/health", self.base_url()))
            .await
            .expect("health request")
            .json()
            .await
            .expect("health body")
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Coordinator on an ephemeral local port.
pub async fn spawn_coordinator(config: OrreryConfig) -> TestCoordinator {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind coordinator");
    let addr = listener.local_addr().expect("local addr");

    let manager = Arc::new(OrreryConfigManager::from_config(config));
    let state = orrery::coordinator::build_state(manager);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(orrery::coordinator::serve(
        listener,
        state.clone(),
        shutdown.clone(),
    ));

    TestCoordinator {
        addr,
        state,
        shutdown,
        handle,
    }
}

pub struct TestWorker {
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<orrery::Result<()>>,
}

impl TestWorker {
    pub async fn stop(self) -> orrery::Result<()> {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("worker stops in time")
            .expect("worker task")
    }
}

/// In-process worker running the reference handlers for `agent_type`.
pub fn spawn_worker(agent_type: AgentType, id: &str, coordinator_url: &str) -> TestWorker {
    spawn_worker_with(
        agent_type,
        id,
        worker_settings(vec![coordinator_url.to_string()]),
    )
}

/// Like [`spawn_worker`] with explicit session settings.
pub fn spawn_worker_with(agent_type: AgentType, id: &str, settings: WorkerConfig) -> TestWorker {
    let identity = reference_identity(id, agent_type).expect("identity");
    let registry = reference_registry(agent_type).expect("registry");
    let runtime = WorkerRuntime::new(identity, registry, settings).expect("runtime");

    let shutdown = runtime.shutdown_token();
    let handle = tokio::spawn(runtime.run());
    TestWorker { shutdown, handle }
}

/// Poll `check` until it returns true or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

//! Coordinator role: worker hub, admission, and research orchestration.

pub mod admission;
pub mod caller;
pub mod context;
pub mod directory;
pub mod hub;
pub mod orchestrator;

pub use admission::{AdmissionDecision, AdmissionGate, CostEstimate};
pub use caller::{AgentCaller, HubCaller};
pub use context::{ContextStatus, ExecutionMode, ResearchContext};
pub use directory::{AgentDirectory, AgentRecord};
pub use hub::Hub;
pub use orchestrator::{OrchestrationEvent, Orchestrator, Submission, TaskHandle};

use crate::rpc::Correlator;
use crate::types::{AppError, Result};
use crate::utils::toml_config::OrreryConfigManager;
use crate::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Wire the coordinator's shared state.
pub fn build_state(config_manager: Arc<OrreryConfigManager>) -> AppState {
    let directory = Arc::new(AgentDirectory::new());
    let correlator = Arc::new(Correlator::new());
    let caller = Arc::new(HubCaller::new(directory.clone(), correlator.clone()));
    let orchestrator = Arc::new(Orchestrator::new(caller, config_manager.clone()));
    let hub = Arc::new(Hub::new(
        directory.clone(),
        correlator.clone(),
        orchestrator.clone(),
    ));

    AppState {
        config_manager,
        directory,
        correlator,
        orchestrator,
        hub,
    }
}

/// Serve HTTP and the agent socket on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    let agent_timeout = state.config_manager.config().coordinator.agent_timeout();
    let forwarder = state.hub.spawn_event_forwarder(shutdown.clone());
    let sweeper = state.hub.spawn_sweeper(agent_timeout, shutdown.clone());
    let hub = state.hub.clone();
    let stop = shutdown.clone();

    let addr = listener
        .local_addr()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    tracing::info!(%addr, "Coordinator listening");

    let result = axum::serve(listener, crate::api::app(state))
        .with_graceful_shutdown(async move {
            stop.cancelled().await;
            hub.close_all();
        })
        .await
        .map_err(|e| AppError::Internal(format!("server error: {e}")));

    shutdown.cancel();
    let _ = forwarder.await;
    let _ = sweeper.await;
    result
}

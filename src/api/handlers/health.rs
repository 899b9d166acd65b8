use crate::{AppState, types::CoordinatorHealth};
use axum::{Json, extract::State};

/// Coordinator liveness and load summary
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Coordinator is serving", body = CoordinatorHealth)
    ),
    tag = "health"
)]
pub async fn health(State(state): State<AppState>) -> Json<CoordinatorHealth> {
    Json(CoordinatorHealth {
        status: "healthy".to_string(),
        connected_agents: state.directory.len(),
        active_contexts: state.orchestrator.active_count(),
        pending_calls: state.correlator.pending_count(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

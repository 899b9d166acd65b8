use crate::{AppState, coordinator::directory::AgentRecord};
use axum::{Json, extract::State};

/// List workers currently registered with the coordinator
#[utoipa::path(
    get,
    path = "/api/agents",
    responses(
        (status = 200, description = "Registered agents", body = Vec<AgentRecord>)
    ),
    tag = "agents"
)]
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentRecord>> {
    Json(state.directory.list())
}

use crate::transport::Session;
use crate::types::WorkerHealth;
use axum::{Json, Router, extract::State, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Operator health endpoint of a worker
pub fn router(session: Arc<Session>) -> Router {
    Router::new()
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(session)
}

async fn health(State(session): State<Arc<Session>>) -> Json<WorkerHealth> {
    let identity = session.identity();
    let connected = session.is_connected();
    Json(WorkerHealth {
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        mcp_connected: connected,
        capabilities: identity.capabilities.iter().cloned().collect(),
        agent_id: identity.id.clone(),
        agent_type: identity.agent_type.to_string(),
    })
}

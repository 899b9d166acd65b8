use crate::AppState;
use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

/// Upgrade to the agent protocol socket
pub async fn agent_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| hub.serve_socket(socket))
}

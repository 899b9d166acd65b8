//! Coordinator discovery.
//!
//! Candidates are HTTP base URLs. Each is probed at `/health`; the first that
//! answers successfully wins, otherwise the first candidate is used and the
//! session's retry loop takes over.

use super::TransportError;
use std::time::Duration;

/// Derive the WebSocket endpoint from a coordinator base URL.
pub fn websocket_url(base: &str) -> String {
    let trimmed = base.trim().trim_end_matches('/');
    let url = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        trimmed.to_string()
    } else {
        format!("ws://{trimmed}")
    };

    if url.ends_with("/ws") {
        url
    } else {
        format!("{url}/ws")
    }
}

fn health_url(base: &str) -> String {
    let trimmed = base.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/ws").unwrap_or(trimmed);
    let http = if let Some(rest) = trimmed.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("ws://") {
        format!("http://{rest}")
    } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    format!("{http}/health")
}

/// Pick the coordinator to connect to and return its WebSocket URL.
pub async fn discover_coordinator(
    candidates: &[String],
    probe_timeout: Duration,
) -> Result<String, TransportError> {
    let first = candidates.first().ok_or(TransportError::NoCoordinator)?;

    let client = match reqwest::Client::builder().timeout(probe_timeout).build() {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Could not build probe client, using first candidate");
            return Ok(websocket_url(first));
        }
    };

    for candidate in candidates {
        let url = health_url(candidate);
        match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(coordinator = %candidate, "Discovered healthy coordinator");
                return Ok(websocket_url(candidate));
            }
            Ok(response) => {
                tracing::debug!(coordinator = %candidate, status = %response.status(), "Coordinator unhealthy");
            }
            Err(e) => {
                tracing::debug!(coordinator = %candidate, error = %e, "Coordinator probe failed");
            }
        }
    }

    tracing::warn!(coordinator = %first, "No coordinator answered its health probe, using first candidate");
    Ok(websocket_url(first))
}

use crate::coordinator::admission::AdmissionDecision;
use crate::coordinator::context::ContextStatus;
use crate::rpc::CallError;
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ============= API Request/Response Types =============

/// A research task submission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResearchRequest {
    /// The research question.
    pub query: String,
    /// Submitting user, carried into logs and status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Execution options.
    #[serde(default)]
    pub options: ResearchOptions,
}

impl ResearchRequest {
    /// A multi-agent request without cost override.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: None,
            options: ResearchOptions::default(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn single_agent(mut self, enabled: bool) -> Self {
        self.options.single_agent_mode = enabled;
        self
    }

    pub fn with_cost_override(mut self, enabled: bool) -> Self {
        self.options.cost_override = enabled;
        self
    }
}

/// Options attached to a [`ResearchRequest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ResearchOptions {
    /// Run the reduced three-stage pipeline on a single agent.
    #[serde(default, alias = "singleAgentMode")]
    pub single_agent_mode: bool,
    /// Start the task even when the estimate exceeds the auto-approve threshold.
    #[serde(default, alias = "costOverride")]
    pub cost_override: bool,
}

/// Result of a submission. Always carries the admission decision.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitResponse {
    /// Task id when the task was started.
    pub task_id: Option<String>,
    /// The admission gate's decision and reasoning.
    pub admission: AdmissionDecision,
    /// Initial status of the started task.
    pub status: Option<ContextStatus>,
}

/// Coordinator health summary.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CoordinatorHealth {
    pub status: String,
    /// Registered worker count.
    pub connected_agents: usize,
    /// Contexts currently tracked, including finished ones in their grace period.
    pub active_contexts: usize,
    /// Outbound calls awaiting a response.
    pub pending_calls: usize,
    pub version: String,
}

/// Worker health summary. Operator-only; carries no business operations.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkerHealth {
    /// "healthy" when connected to the coordinator, "degraded" otherwise.
    pub status: String,
    /// Whether the protocol connection to the coordinator is up.
    pub mcp_connected: bool,
    pub capabilities: Vec<String>,
    pub agent_id: String,
    pub agent_type: String,
}

// ============= Error Types =============

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] orrery_protocol::Error),

    #[error("Call failed: {0}")]
    Call(#[from] CallError),

    #[error("Admission rejected: {0}")]
    AdmissionRejected(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            AppError::Configuration(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Transport(_) | AppError::Call(_) => StatusCode::BAD_GATEWAY,
            AppError::Protocol(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::AdmissionRejected(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

//! Shared protocol data types: agent identity, stages, research actions and reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// The specialization a worker process advertises when it registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Breaks a query into a research plan.
    Planner,
    /// Bibliographic search and literature review.
    Literature,
    /// Statistical reasoning and meta-analysis.
    Reasoning,
    /// Sandboxed code execution.
    Execution,
    /// Report synthesis and template rendering.
    Synthesis,
    /// Proxy in front of external AI providers.
    AiProxy,
    /// Credential issuance for other agents.
    Credentials,
}

impl AgentType {
    /// All agent types, in declaration order.
    pub const ALL: [AgentType; 7] = [
        AgentType::Planner,
        AgentType::Literature,
        AgentType::Reasoning,
        AgentType::Execution,
        AgentType::Synthesis,
        AgentType::AiProxy,
        AgentType::Credentials,
    ];

    /// Wire name of the agent type.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Planner => "planner",
            AgentType::Literature => "literature",
            AgentType::Reasoning => "reasoning",
            AgentType::Execution => "execution",
            AgentType::Synthesis => "synthesis",
            AgentType::AiProxy => "ai_proxy",
            AgentType::Credentials => "credentials",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known agent type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown agent type '{0}'")]
pub struct ParseAgentTypeError(pub String);

impl FromStr for AgentType {
    type Err = ParseAgentTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        AgentType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ParseAgentTypeError(s.to_string()))
    }
}

/// Who a worker is. Built once at process start and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Unique agent id.
    pub id: String,
    /// Agent specialization.
    pub agent_type: AgentType,
    /// Task types this agent can execute.
    pub capabilities: BTreeSet<String>,
}

impl AgentIdentity {
    /// Create an identity from an id, a type and a list of capabilities.
    pub fn new<I, S>(id: impl Into<String>, agent_type: AgentType, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            agent_type,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the agent advertises the given capability.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Operator-facing endpoint a worker exposes next to its protocol connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Port of the worker's health server.
    pub port: u16,
    /// Path of the health endpoint.
    pub health_endpoint: String,
}

/// One phase of a research pipeline, plus the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Decompose the query.
    Planning,
    /// Gather and review literature.
    LiteratureReview,
    /// Analyse the gathered evidence.
    Reasoning,
    /// Run computations over the evidence.
    Execution,
    /// Produce the final report.
    Synthesis,
    /// Every required stage completed.
    Complete,
    /// A stage exhausted its retry budget.
    Failed,
}

impl Stage {
    /// Wire name of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::LiteratureReview => "literature_review",
            Stage::Reasoning => "reasoning",
            Stage::Execution => "execution",
            Stage::Synthesis => "synthesis",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }

    /// `Complete` and `Failed` admit no further stage execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of stage work sent from the coordinator to a worker as `task/execute` params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchAction {
    /// Research task the action belongs to.
    pub task_id: String,
    /// Context executing the task.
    pub context_id: String,
    /// Agent type expected to execute the action.
    pub target_agent_type: AgentType,
    /// Task type the worker dispatches on.
    pub action: String,
    /// Action input.
    pub payload: Value,
    /// Seconds the coordinator waits for the response.
    pub timeout_secs: u64,
    /// Stages whose results the action builds on.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Outcome status carried by an [`AgentResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// The handler produced a result.
    Completed,
    /// The handler failed.
    Error,
}

/// A worker's answer to a [`ResearchAction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Research task id.
    pub task_id: String,
    /// Context id.
    pub context_id: String,
    /// Type of the agent that answered.
    pub agent_type: AgentType,
    /// Whether the handler succeeded.
    pub status: ResponseStatus,
    /// Handler output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResponse {
    /// A successful response.
    pub fn completed(
        task_id: impl Into<String>,
        context_id: impl Into<String>,
        agent_type: AgentType,
        result: Value,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
            agent_type,
            status: ResponseStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    /// A failed response.
    pub fn failed(
        task_id: impl Into<String>,
        context_id: impl Into<String>,
        agent_type: AgentType,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
            agent_type,
            status: ResponseStatus::Error,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Whether the status is `completed`.
    pub fn is_completed(&self) -> bool {
        self.status == ResponseStatus::Completed
    }
}

/// Registration payload a worker sends right after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Agent id.
    pub agent_id: String,
    /// Agent type.
    pub agent_type: AgentType,
    /// Advertised capabilities.
    pub capabilities: Vec<String>,
    /// Health endpoint details, when the worker runs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_info: Option<ServiceInfo>,
}

impl Registration {
    /// Build the registration payload for an identity.
    pub fn from_identity(identity: &AgentIdentity, service_info: Option<ServiceInfo>) -> Self {
        Self {
            agent_id: identity.id.clone(),
            agent_type: identity.agent_type,
            capabilities: identity.capabilities.iter().cloned().collect(),
            service_info,
        }
    }

    /// Recover the identity the payload describes.
    pub fn identity(&self) -> AgentIdentity {
        AgentIdentity::new(
            self.agent_id.clone(),
            self.agent_type,
            self.capabilities.iter().cloned(),
        )
    }
}

/// Progress broadcast before each stage of a research task executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Research task id.
    pub task_id: String,
    /// Stage about to execute.
    pub stage: Stage,
    /// Percentage of stages completed, 0 to 100.
    pub progress: f64,
    /// Stages completed so far.
    pub completed_stages: Vec<Stage>,
    /// Stages on the task's path.
    pub total_stages: usize,
    /// When the update was produced.
    pub timestamp: DateTime<Utc>,
}

/// Terminal report emitted once a research task completes or fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    /// Research task id.
    pub task_id: String,
    /// `Complete` or `Failed`.
    pub status: Stage,
    /// The original query.
    pub query: String,
    /// Accumulated stage results keyed by stage name.
    pub results: serde_json::Map<String, Value>,
    /// Stages that completed.
    pub completed_stages: Vec<Stage>,
    /// Stages that exhausted their retries.
    pub failed_stages: Vec<Stage>,
    /// Wall-clock duration of the pipeline.
    pub duration_secs: f64,
    /// Retries consumed.
    pub retry_count: u32,
}

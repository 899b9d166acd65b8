//! Built-in reference task handlers.
//!
//! Each agent type ships a small deterministic handler so a fleet can run a
//! pipeline end to end without external services. Real handlers implement the
//! same [`TaskHandler`] trait and register the same way.

pub mod execution;
pub mod literature;
pub mod planner;
pub mod reasoning;
pub mod synthesis;

pub use execution::ExecuteAnalysis;
pub use literature::ReviewLiterature;
pub use planner::PlanResearch;
pub use reasoning::AnalyzeEvidence;
pub use synthesis::SynthesizeReport;

use crate::types::{AppError, Result};
use crate::worker::{HandlerError, HandlerRegistry, TaskHandler, TaskRequest};
use orrery_protocol::{AgentIdentity, AgentType};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Handlers an agent type runs out of the box.
fn reference_handlers(agent_type: AgentType) -> Result<Vec<Arc<dyn TaskHandler>>> {
    let handlers: Vec<Arc<dyn TaskHandler>> = match agent_type {
        AgentType::Planner => vec![Arc::new(PlanResearch)],
        // Literature workers also cover planning and synthesis in single-agent mode.
        AgentType::Literature => vec![
            Arc::new(ReviewLiterature),
            Arc::new(PlanResearch),
            Arc::new(SynthesizeReport),
        ],
        AgentType::Reasoning => vec![Arc::new(AnalyzeEvidence)],
        AgentType::Execution => vec![Arc::new(ExecuteAnalysis)],
        AgentType::Synthesis => vec![Arc::new(SynthesizeReport)],
        AgentType::AiProxy | AgentType::Credentials => {
            return Err(AppError::Configuration(format!(
                "no built-in handlers for agent type '{agent_type}'"
            )))
        }
    };
    Ok(handlers)
}

/// Registry holding the reference handlers for `agent_type`.
pub fn reference_registry(agent_type: AgentType) -> Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    for handler in reference_handlers(agent_type)? {
        registry.register(handler);
    }
    Ok(registry)
}

/// Identity advertising every capability the reference registry provides.
pub fn reference_identity(id: impl Into<String>, agent_type: AgentType) -> Result<AgentIdentity> {
    let registry = reference_registry(agent_type)?;
    Ok(AgentIdentity::new(id, agent_type, registry.task_types()))
}

/// The research query carried in a stage payload.
pub(crate) fn query_of(request: &TaskRequest) -> std::result::Result<&str, HandlerError> {
    request
        .data
        .get("query")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| HandlerError::InvalidInput("payload has no query".to_string()))
}

/// Results of earlier stages, keyed by stage name.
pub(crate) fn previous_results(request: &TaskRequest) -> Map<String, Value> {
    request
        .data
        .get("previous_results")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

//! How the orchestrator reaches workers.

use super::directory::AgentDirectory;
use crate::rpc::{CallError, Correlator};
use async_trait::async_trait;
use orrery_protocol::{AgentResponse, Method, ResearchAction};
use std::sync::Arc;
use std::time::Duration;

/// Sends one stage action to a worker and returns its answer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentCaller: Send + Sync {
    async fn dispatch(&self, action: ResearchAction) -> Result<AgentResponse, CallError>;
}

/// Dispatches over the coordinator's worker connections.
pub struct HubCaller {
    directory: Arc<AgentDirectory>,
    correlator: Arc<Correlator>,
}

impl HubCaller {
    pub fn new(directory: Arc<AgentDirectory>, correlator: Arc<Correlator>) -> Self {
        Self {
            directory,
            correlator,
        }
    }
}

#[async_trait]
impl AgentCaller for HubCaller {
    async fn dispatch(&self, action: ResearchAction) -> Result<AgentResponse, CallError> {
        let (agent_id, outbox) = self
            .directory
            .select(action.target_agent_type)
            .ok_or(CallError::NoAgent(action.target_agent_type))?;

        tracing::debug!(
            task_id = %action.task_id,
            agent_id = %agent_id,
            action = %action.action,
            "Dispatching stage action"
        );

        let timeout = Duration::from_secs(action.timeout_secs.max(1));
        let params =
            serde_json::to_value(&action).map_err(|e| CallError::MalformedResult(e.to_string()))?;

        match self
            .correlator
            .call(&outbox, Method::TaskExecute, params, timeout)
            .await
        {
            Ok(value) => serde_json::from_value(value)
                .map_err(|e| CallError::MalformedResult(e.to_string())),
            // Handler failures carry the worker's AgentResponse in the error data.
            Err(CallError::Remote(error)) => match error
                .data
                .clone()
                .and_then(|data| serde_json::from_value::<AgentResponse>(data).ok())
            {
                Some(response) => Ok(response),
                None => Err(CallError::Remote(error)),
            },
            Err(e) => Err(e),
        }
    }
}

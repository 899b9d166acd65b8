//! Per-task research context and its state machine.
//!
//! A context moves through the stages of its execution mode in order and ends
//! in `Complete` only when every required stage completed; any stage that
//! fails after its retry sends it to `Failed`.

use super::admission::AdmissionDecision;
use crate::types::{AppError, Result};
use chrono::{DateTime, Utc};
use orrery_protocol::{AgentType, CompletionReport, ProgressUpdate, Stage};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

const MULTI_AGENT_STAGES: [Stage; 5] = [
    Stage::Planning,
    Stage::LiteratureReview,
    Stage::Reasoning,
    Stage::Execution,
    Stage::Synthesis,
];

const SINGLE_AGENT_STAGES: [Stage; 3] = [Stage::Planning, Stage::LiteratureReview, Stage::Synthesis];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    SingleAgent,
    MultiAgent,
}

impl ExecutionMode {
    pub fn from_flag(single_agent: bool) -> Self {
        if single_agent {
            ExecutionMode::SingleAgent
        } else {
            ExecutionMode::MultiAgent
        }
    }

    /// Ordered stages a task in this mode must complete.
    pub fn stages(&self) -> &'static [Stage] {
        match self {
            ExecutionMode::SingleAgent => &SINGLE_AGENT_STAGES,
            ExecutionMode::MultiAgent => &MULTI_AGENT_STAGES,
        }
    }
}

/// Agent type that runs `stage` in multi-agent mode.
pub fn stage_agent(stage: Stage) -> Option<AgentType> {
    match stage {
        Stage::Planning => Some(AgentType::Planner),
        Stage::LiteratureReview => Some(AgentType::Literature),
        Stage::Reasoning => Some(AgentType::Reasoning),
        Stage::Execution => Some(AgentType::Execution),
        Stage::Synthesis => Some(AgentType::Synthesis),
        Stage::Complete | Stage::Failed => None,
    }
}

/// Task type a worker runs for `stage`.
pub fn stage_action(stage: Stage) -> Option<&'static str> {
    match stage {
        Stage::Planning => Some("plan_research"),
        Stage::LiteratureReview => Some("review_literature"),
        Stage::Reasoning => Some("analyze_evidence"),
        Stage::Execution => Some("execute_analysis"),
        Stage::Synthesis => Some("synthesize_report"),
        Stage::Complete | Stage::Failed => None,
    }
}

#[derive(Debug, Clone)]
pub struct ResearchContext {
    pub task_id: String,
    pub user_id: Option<String>,
    pub query: String,
    pub stage: Stage,
    pub mode: ExecutionMode,
    pub cost_approved: bool,
    pub estimated_cost_usd: f64,
    pub completed_stages: Vec<Stage>,
    pub failed_stages: Vec<Stage>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub results: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ResearchContext {
    /// Create a context for an admitted task. Refuses a decision that did not
    /// approve the task.
    pub fn new(
        task_id: impl Into<String>,
        query: impl Into<String>,
        user_id: Option<String>,
        mode: ExecutionMode,
        admission: &AdmissionDecision,
        max_retries: u32,
    ) -> Result<Self> {
        if !admission.should_proceed {
            return Err(AppError::AdmissionRejected(admission.reasoning.clone()));
        }

        Ok(Self {
            task_id: task_id.into(),
            user_id,
            query: query.into(),
            stage: Stage::Planning,
            mode,
            cost_approved: true,
            estimated_cost_usd: admission.estimated_cost_usd,
            completed_stages: Vec::new(),
            failed_stages: Vec::new(),
            retry_count: 0,
            max_retries,
            results: Map::new(),
            created_at: Utc::now(),
            finished_at: None,
        })
    }

    pub fn total_stages(&self) -> usize {
        self.mode.stages().len()
    }

    /// Percentage of required stages completed.
    pub fn progress(&self) -> f64 {
        let total = self.total_stages();
        if total == 0 {
            return 100.0;
        }
        (self.completed_stages.len() as f64 / total as f64 * 100.0).min(100.0)
    }

    pub fn is_finished(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn begin(&mut self, stage: Stage) {
        debug_assert!(!self.is_finished(), "stage started on a finished context");
        self.stage = stage;
    }

    pub fn record_success(&mut self, stage: Stage, result: Value) {
        self.results.insert(stage.as_str().to_string(), result);
        if !self.completed_stages.contains(&stage) {
            self.completed_stages.push(stage);
        }
    }

    pub fn record_failure(&mut self, stage: Stage) {
        if !self.failed_stages.contains(&stage) {
            self.failed_stages.push(stage);
        }
        self.stage = Stage::Failed;
    }

    /// Take one retry from the context-wide budget, if any is left.
    pub fn consume_retry(&mut self) -> bool {
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            true
        } else {
            false
        }
    }

    /// Settle the terminal state and return it.
    pub fn finish(&mut self) -> Stage {
        let all_done = self
            .mode
            .stages()
            .iter()
            .all(|stage| self.completed_stages.contains(stage));
        self.stage = if all_done && self.failed_stages.is_empty() {
            Stage::Complete
        } else {
            Stage::Failed
        };
        self.finished_at = Some(Utc::now());
        self.stage
    }

    pub fn progress_update(&self) -> ProgressUpdate {
        ProgressUpdate {
            task_id: self.task_id.clone(),
            stage: self.stage,
            progress: self.progress(),
            completed_stages: self.completed_stages.clone(),
            total_stages: self.total_stages(),
            timestamp: Utc::now(),
        }
    }

    pub fn completion_report(&self, duration_secs: f64) -> CompletionReport {
        CompletionReport {
            task_id: self.task_id.clone(),
            status: self.stage,
            query: self.query.clone(),
            results: self.results.clone(),
            completed_stages: self.completed_stages.clone(),
            failed_stages: self.failed_stages.clone(),
            duration_secs,
            retry_count: self.retry_count,
        }
    }

    pub fn status(&self) -> ContextStatus {
        ContextStatus {
            task_id: self.task_id.clone(),
            user_id: self.user_id.clone(),
            query: self.query.clone(),
            stage: self.stage,
            mode: self.mode,
            progress: self.progress(),
            completed_stages: self.completed_stages.clone(),
            failed_stages: self.failed_stages.clone(),
            total_stages: self.total_stages(),
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            cost_approved: self.cost_approved,
            estimated_cost_usd: self.estimated_cost_usd,
            results: self.results.clone(),
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }
}

/// Read-only view of a context served by the status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ContextStatus {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub query: String,
    #[schema(value_type = String)]
    pub stage: Stage,
    pub mode: ExecutionMode,
    pub progress: f64,
    #[schema(value_type = Vec<String>)]
    pub completed_stages: Vec<Stage>,
    #[schema(value_type = Vec<String>)]
    pub failed_stages: Vec<Stage>,
    pub total_stages: usize,
    pub retry_count: u32,
    pub max_retries: u32,
    pub cost_approved: bool,
    pub estimated_cost_usd: f64,
    #[schema(value_type = Object)]
    pub results: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

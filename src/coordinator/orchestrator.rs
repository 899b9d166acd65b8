//! Research orchestration.
//!
//! `submit` runs the admission gate synchronously. An admitted task gets a
//! context and a pipeline task that walks the mode's stages in order: one
//! dispatch per stage, one retry on failure while the context-wide retry
//! budget lasts, halt on the first stage that still fails. Each stage only
//! starts after the previous one returned. Progress is published before every
//! stage and a completion report once the pipeline ends; the finished context
//! stays queryable for the configured grace period.

use super::admission::{AdmissionDecision, AdmissionGate};
use super::caller::AgentCaller;
use super::context::{stage_action, stage_agent, ExecutionMode, ResearchContext, ContextStatus};
use crate::types::{AppError, ResearchRequest, Result};
use crate::utils::toml_config::{OrchestrationConfig, OrreryConfigManager};
use orrery_protocol::{CompletionReport, ProgressUpdate, ResearchAction, Stage};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestrationEvent {
    Progress(ProgressUpdate),
    Completed(CompletionReport),
}

impl OrchestrationEvent {
    pub fn task_id(&self) -> &str {
        match self {
            OrchestrationEvent::Progress(update) => &update.task_id,
            OrchestrationEvent::Completed(report) => &report.task_id,
        }
    }
}

/// A started pipeline.
pub struct TaskHandle {
    pub task_id: String,
    join: JoinHandle<ContextStatus>,
}

impl TaskHandle {
    /// Wait for the pipeline to reach a terminal stage.
    pub async fn wait(self) -> Result<ContextStatus> {
        self.join
            .await
            .map_err(|e| AppError::Internal(format!("research pipeline aborted: {e}")))
    }
}

/// Outcome of a submission.
pub struct Submission {
    pub decision: AdmissionDecision,
    pub task: Option<TaskHandle>,
}

pub struct Orchestrator {
    caller: Arc<dyn AgentCaller>,
    config: Arc<OrreryConfigManager>,
    contexts: Mutex<HashMap<String, ContextStatus>>,
    events: broadcast::Sender<OrchestrationEvent>,
}

impl Orchestrator {
    pub fn new(caller: Arc<dyn AgentCaller>, config: Arc<OrreryConfigManager>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            caller,
            config,
            contexts: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.events.subscribe()
    }

    /// Gate a request and, when admitted, start its pipeline.
    pub fn submit(self: &Arc<Self>, request: ResearchRequest) -> Result<Submission> {
        self.submit_observed(request, |_| {})
    }

    /// Like [`submit`](Self::submit), calling `before_start` with the new task
    /// id before the pipeline can emit its first event.
    pub fn submit_observed<F>(
        self: &Arc<Self>,
        request: ResearchRequest,
        before_start: F,
    ) -> Result<Submission>
    where
        F: FnOnce(&str),
    {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(AppError::InvalidInput("query must not be empty".to_string()));
        }

        let config = self.config.config();
        let mode = ExecutionMode::from_flag(request.options.single_agent_mode);
        let decision = AdmissionGate::new(config.admission.clone())
            .evaluate(mode, request.options.cost_override);

        if !decision.should_proceed {
            tracing::info!(
                estimated_cost_usd = decision.estimated_cost_usd,
                user_id = request.user_id.as_deref().unwrap_or("-"),
                "Research task rejected by admission gate"
            );
            return Ok(Submission {
                decision,
                task: None,
            });
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        let context = ResearchContext::new(
            task_id.clone(),
            query,
            request.user_id.clone(),
            mode,
            &decision,
            config.orchestration.max_retries,
        )?;
        self.contexts.lock().insert(task_id.clone(), context.status());

        tracing::info!(
            task_id = %task_id,
            mode = ?mode,
            estimated_cost_usd = decision.estimated_cost_usd,
            auto_approved = decision.auto_approved,
            "Research task admitted"
        );

        before_start(&task_id);
        let settings = config.orchestration.clone();
        let orchestrator = Arc::clone(self);
        let join = tokio::spawn(async move { orchestrator.run_pipeline(context, settings).await });

        Ok(Submission {
            decision,
            task: Some(TaskHandle { task_id, join }),
        })
    }

    pub fn status(&self, task_id: &str) -> Option<ContextStatus> {
        self.contexts.lock().get(task_id).cloned()
    }

    /// Tracked contexts, newest first.
    pub fn list(&self) -> Vec<ContextStatus> {
        let mut contexts: Vec<ContextStatus> = self.contexts.lock().values().cloned().collect();
        contexts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        contexts
    }

    pub fn active_count(&self) -> usize {
        self.contexts.lock().len()
    }

    async fn run_pipeline(
        self: Arc<Self>,
        mut ctx: ResearchContext,
        settings: OrchestrationConfig,
    ) -> ContextStatus {
        let started = Instant::now();

        for &stage in ctx.mode.stages() {
            if ctx.is_finished() {
                break;
            }

            ctx.begin(stage);
            self.publish(&ctx);
            self.emit(OrchestrationEvent::Progress(ctx.progress_update()));
            tracing::info!(task_id = %ctx.task_id, stage = %stage, progress = ctx.progress(), "Stage starting");

            let mut outcome = self.execute_stage(&ctx, stage, &settings).await;
            if outcome.is_none() && ctx.consume_retry() {
                tracing::warn!(
                    task_id = %ctx.task_id,
                    stage = %stage,
                    retry_count = ctx.retry_count,
                    "Retrying stage"
                );
                self.publish(&ctx);
                outcome = self.execute_stage(&ctx, stage, &settings).await;
            }

            match outcome {
                Some(result) => ctx.record_success(stage, result),
                None => {
                    tracing::error!(task_id = %ctx.task_id, stage = %stage, "Stage failed, halting pipeline");
                    ctx.record_failure(stage);
                }
            }
            self.publish(&ctx);
        }

        let terminal = ctx.finish();
        let duration = started.elapsed().as_secs_f64();
        let status = ctx.status();
        self.publish(&ctx);
        self.emit(OrchestrationEvent::Completed(ctx.completion_report(duration)));

        tracing::info!(
            task_id = %ctx.task_id,
            stage = %terminal,
            completed = ctx.completed_stages.len(),
            retry_count = ctx.retry_count,
            duration_secs = duration,
            "Research task finished"
        );

        self.schedule_cleanup(ctx.task_id.clone(), settings);
        status
    }

    /// Dispatch one stage. Returns the stage result on success.
    async fn execute_stage(
        &self,
        ctx: &ResearchContext,
        stage: Stage,
        settings: &OrchestrationConfig,
    ) -> Option<serde_json::Value> {
        let action = build_action(ctx, stage, settings)?;
        let started = Instant::now();

        match self.caller.dispatch(action).await {
            Ok(response) if response.is_completed() => {
                tracing::debug!(
                    task_id = %ctx.task_id,
                    stage = %stage,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Stage completed"
                );
                Some(response.result.unwrap_or(serde_json::Value::Null))
            }
            Ok(response) => {
                tracing::warn!(
                    task_id = %ctx.task_id,
                    stage = %stage,
                    error = response.error.as_deref().unwrap_or("unknown error"),
                    "Agent reported stage failure"
                );
                None
            }
            Err(e) => {
                tracing::warn!(task_id = %ctx.task_id, stage = %stage, error = %e, "Stage dispatch failed");
                None
            }
        }
    }

    fn publish(&self, ctx: &ResearchContext) {
        self.contexts
            .lock()
            .insert(ctx.task_id.clone(), ctx.status());
    }

    fn emit(&self, event: OrchestrationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn schedule_cleanup(self: &Arc<Self>, task_id: String, settings: OrchestrationConfig) {
        let grace = settings.cleanup_grace();
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if orchestrator.contexts.lock().remove(&task_id).is_some() {
                tracing::debug!(task_id = %task_id, "Finished context cleaned up");
            }
        });
    }
}

fn build_action(
    ctx: &ResearchContext,
    stage: Stage,
    settings: &OrchestrationConfig,
) -> Option<ResearchAction> {
    let target_agent_type = match ctx.mode {
        ExecutionMode::SingleAgent => settings.single_agent_type,
        ExecutionMode::MultiAgent => stage_agent(stage)?,
    };

    Some(ResearchAction {
        task_id: ctx.task_id.clone(),
        context_id: ctx.task_id.clone(),
        target_agent_type,
        action: stage_action(stage)?.to_string(),
        payload: json!({
            "query": ctx.query,
            "stage": stage,
            "mode": ctx.mode,
            "previous_results": ctx.results,
        }),
        timeout_secs: settings.stage_timeout_secs,
        dependencies: ctx
            .completed_stages
            .iter()
            .map(|s| s.as_str().to_string())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::caller::MockAgentCaller;
    use crate::rpc::CallError;
    use crate::utils::toml_config::OrreryConfig;
    use orrery_protocol::{AgentResponse, AgentType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn orchestrator(caller: MockAgentCaller) -> Arc<Orchestrator> {
        let config = OrreryConfigManager::from_config(OrreryConfig::default());
        Arc::new(Orchestrator::new(Arc::new(caller), Arc::new(config)))
    }

    fn ok(action: &ResearchAction) -> AgentResponse {
        AgentResponse::completed(
            action.task_id.clone(),
            action.context_id.clone(),
            action.target_agent_type,
            json!({"action": action.action}),
        )
    }

    async fn run(orchestrator: &Arc<Orchestrator>, request: ResearchRequest) -> ContextStatus {
        let submission = orchestrator.submit(request).unwrap();
        assert!(submission.decision.should_proceed);
        submission.task.unwrap().wait().await.unwrap()
    }

    #[tokio::test]
    async fn multi_agent_pipeline_completes_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut caller = MockAgentCaller::new();
        let seen = order.clone();
        caller.expect_dispatch().times(5).returning(move |action| {
            seen.lock().push((action.target_agent_type, action.action.clone()));
            Ok(ok(&action))
        });

        let orchestrator = orchestrator(caller);
        let status = run(&orchestrator, ResearchRequest::new("effects of sleep on memory")).await;

        assert_eq!(status.stage, Stage::Complete);
        assert_eq!(status.completed_stages.len(), 5);
        assert_eq!(status.progress, 100.0);
        assert_eq!(status.retry_count, 0);
        assert_eq!(status.results.len(), 5);
        assert_eq!(
            *order.lock(),
            vec![
                (AgentType::Planner, "plan_research".to_string()),
                (AgentType::Literature, "review_literature".to_string()),
                (AgentType::Reasoning, "analyze_evidence".to_string()),
                (AgentType::Execution, "execute_analysis".to_string()),
                (AgentType::Synthesis, "synthesize_report".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn single_agent_pipeline_targets_one_type() {
        let mut caller = MockAgentCaller::new();
        caller
            .expect_dispatch()
            .times(3)
            .withf(|action| action.target_agent_type == AgentType::Literature)
            .returning(|action| Ok(ok(&action)));

        let orchestrator = orchestrator(caller);
        let status = run(&orchestrator, ResearchRequest::new("q").single_agent(true)).await;

        assert_eq!(status.stage, Stage::Complete);
        assert_eq!(
            status.completed_stages,
            vec![Stage::Planning, Stage::LiteratureReview, Stage::Synthesis]
        );
    }

    #[tokio::test]
    async fn failed_stage_is_retried_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut caller = MockAgentCaller::new();
        caller.expect_dispatch().returning(move |action| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if action.action == "analyze_evidence" && n == 2 {
                Err(CallError::TimedOut {
                    method: "task/execute".into(),
                    timeout: std::time::Duration::from_secs(1),
                })
            } else {
                Ok(ok(&action))
            }
        });

        let orchestrator = orchestrator(caller);
        let status = run(&orchestrator, ResearchRequest::new("q")).await;

        assert_eq!(status.stage, Stage::Complete);
        assert_eq!(status.retry_count, 1);
        assert!(status.failed_stages.is_empty());
        assert_eq!(
            status
                .completed_stages
                .iter()
                .filter(|s| **s == Stage::Reasoning)
                .count(),
            1
        );
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn stage_failing_twice_halts_pipeline() {
        let mut caller = MockAgentCaller::new();
        caller.expect_dispatch().returning(|action| {
            if action.action == "analyze_evidence" {
                Ok(AgentResponse::failed(
                    action.task_id.clone(),
                    action.context_id.clone(),
                    action.target_agent_type,
                    "no evidence",
                ))
            } else {
                Ok(ok(&action))
            }
        });

        let orchestrator = orchestrator(caller);
        let status = run(&orchestrator, ResearchRequest::new("q")).await;

        assert_eq!(status.stage, Stage::Failed);
        assert_eq!(status.failed_stages, vec![Stage::Reasoning]);
        assert_eq!(
            status.completed_stages,
            vec![Stage::Planning, Stage::LiteratureReview]
        );
        assert_eq!(status.retry_count, 1);
        assert!(!status.results.contains_key("execution"));
    }

    #[tokio::test]
    async fn retry_budget_is_shared_across_stages() {
        let mut config = OrreryConfig::default();
        config.orchestration.max_retries = 1;
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let mut caller = MockAgentCaller::new();
        caller.expect_dispatch().returning(move |action| {
            // First attempt of every stage fails.
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 || n == 2 {
                Err(CallError::NoAgent(action.target_agent_type))
            } else {
                Ok(ok(&action))
            }
        });
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(caller),
            Arc::new(OrreryConfigManager::from_config(config)),
        ));

        let status = run(&orchestrator, ResearchRequest::new("q")).await;
        assert_eq!(status.stage, Stage::Failed);
        assert_eq!(status.completed_stages, vec![Stage::Planning]);
        assert_eq!(status.failed_stages, vec![Stage::LiteratureReview]);
        assert_eq!(status.retry_count, 1);
    }

    #[tokio::test]
    async fn rejected_submission_starts_nothing() {
        let mut config = OrreryConfig::default();
        config.admission.usd_per_1k_tokens = 0.05;
        let mut caller = MockAgentCaller::new();
        caller.expect_dispatch().never();
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(caller),
            Arc::new(OrreryConfigManager::from_config(config)),
        ));

        let submission = orchestrator.submit(ResearchRequest::new("q")).unwrap();
        assert!(!submission.decision.should_proceed);
        assert!(submission.task.is_none());
        assert_eq!(orchestrator.active_count(), 0);
    }

    #[tokio::test]
    async fn cost_override_admits_expensive_task() {
        let mut config = OrreryConfig::default();
        config.admission.usd_per_1k_tokens = 0.05;
        let mut caller = MockAgentCaller::new();
        caller.expect_dispatch().returning(|action| Ok(ok(&action)));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(caller),
            Arc::new(OrreryConfigManager::from_config(config)),
        ));

        let submission = orchestrator
            .submit(ResearchRequest::new("q").with_cost_override(true))
            .unwrap();
        assert!(submission.decision.should_proceed);
        assert!(!submission.decision.auto_approved);
        let status = submission.task.unwrap().wait().await.unwrap();
        assert_eq!(status.stage, Stage::Complete);
    }

    #[tokio::test]
    async fn empty_query_is_invalid() {
        let orchestrator = orchestrator(MockAgentCaller::new());
        let result = orchestrator.submit(ResearchRequest::new("   "));
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn progress_precedes_each_stage_and_completion_follows() {
        let mut caller = MockAgentCaller::new();
        caller.expect_dispatch().returning(|action| Ok(ok(&action)));
        let orchestrator = orchestrator(caller);
        let mut events = orchestrator.subscribe();

        let status = run(&orchestrator, ResearchRequest::new("q").single_agent(true)).await;

        let mut progress = Vec::new();
        let report = loop {
            match events.recv().await.unwrap() {
                OrchestrationEvent::Progress(update) => progress.push(update),
                OrchestrationEvent::Completed(report) => break report,
            }
        };

        let stages: Vec<Stage> = progress.iter().map(|u| u.stage).collect();
        assert_eq!(
            stages,
            vec![Stage::Planning, Stage::LiteratureReview, Stage::Synthesis]
        );
        assert_eq!(progress[0].progress, 0.0);
        assert!((progress[1].progress - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.status, Stage::Complete);
        assert_eq!(report.task_id, status.task_id);
        assert_eq!(report.results.len(), 3);
    }

    #[tokio::test]
    async fn later_stages_see_earlier_results() {
        let mut caller = MockAgentCaller::new();
        caller.expect_dispatch().returning(|action| {
            if action.action == "synthesize_report" {
                assert!(action.payload["previous_results"]["planning"].is_object());
                assert_eq!(action.dependencies, vec!["planning", "literature_review"]);
            }
            Ok(ok(&action))
        });
        let orchestrator = orchestrator(caller);
        let status = run(&orchestrator, ResearchRequest::new("q").single_agent(true)).await;
        assert_eq!(status.stage, Stage::Complete);
    }

    #[tokio::test]
    async fn finished_context_is_cleaned_up_after_grace() {
        let mut config = OrreryConfig::default();
        config.orchestration.cleanup_grace_secs = 0;
        let mut caller = MockAgentCaller::new();
        caller.expect_dispatch().returning(|action| Ok(ok(&action)));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(caller),
            Arc::new(OrreryConfigManager::from_config(config)),
        ));

        let status = run(&orchestrator, ResearchRequest::new("q").single_agent(true)).await;
        for _ in 0..50 {
            if orchestrator.status(&status.task_id).is_none() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("context was not cleaned up");
    }
}

use super::{previous_results, query_of};
use crate::worker::{HandlerError, TaskHandler, TaskRequest};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

/// Records an analysis run over the evidence score.
pub struct ExecuteAnalysis;

#[async_trait]
impl TaskHandler for ExecuteAnalysis {
    fn task_type(&self) -> &str {
        "execute_analysis"
    }

    fn description(&self) -> &str {
        "Run the analysis over scored evidence"
    }

    async fn handle(&self, request: &TaskRequest) -> Result<Value, HandlerError> {
        let query = query_of(request)?;
        let strength = previous_results(request)
            .get("reasoning")
            .and_then(|r| r.get("evidence_strength"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        Ok(json!({
            "query": query,
            "run_id": request.task_id,
            "executed_at": Utc::now().to_rfc3339(),
            "inputs": request.dependencies,
            "effect_estimate": (strength * 100.0).round() / 100.0,
        }))
    }
}

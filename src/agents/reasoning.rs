use super::{previous_results, query_of};
use crate::worker::{HandlerError, TaskHandler, TaskRequest};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Scores the evidence gathered so far.
pub struct AnalyzeEvidence;

#[async_trait]
impl TaskHandler for AnalyzeEvidence {
    fn task_type(&self) -> &str {
        "analyze_evidence"
    }

    fn description(&self) -> &str {
        "Score the evidence produced by earlier stages"
    }

    async fn handle(&self, request: &TaskRequest) -> Result<Value, HandlerError> {
        let query = query_of(request)?;
        let previous = previous_results(request);

        let sources = previous
            .get("literature_review")
            .and_then(|review| review.get("search_plan"))
            .and_then(Value::as_array)
            .map(Vec::len)
            .ok_or_else(|| {
                HandlerError::Failed("no literature review to analyse".to_string())
            })?;

        // Saturates at ten sources.
        let strength = (sources.min(10) as f64) / 10.0;

        Ok(json!({
            "query": query,
            "sources_considered": sources,
            "evidence_strength": strength,
            "confidence": if strength >= 0.5 { "moderate" } else { "low" },
        }))
    }
}

use super::{previous_results, query_of};
use crate::worker::{HandlerError, TaskHandler, TaskRequest};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Assembles a report from the accumulated stage results.
pub struct SynthesizeReport;

#[async_trait]
impl TaskHandler for SynthesizeReport {
    fn task_type(&self) -> &str {
        "synthesize_report"
    }

    fn description(&self) -> &str {
        "Assemble a report from earlier stage results"
    }

    async fn handle(&self, request: &TaskRequest) -> Result<Value, HandlerError> {
        let query = query_of(request)?;
        let previous = previous_results(request);

        let mut sections: Vec<Value> = previous
            .iter()
            .map(|(stage, result)| {
                let body = result
                    .get("summary")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| result.to_string());
                json!({"stage": stage, "body": body})
            })
            .collect();
        sections.sort_by(|a, b| a["stage"].as_str().cmp(&b["stage"].as_str()));

        Ok(json!({
            "title": format!("Research report: {query}"),
            "sections": sections,
            "stages_used": previous.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_has_section_per_stage() {
        let request = TaskRequest {
            task_id: "t".into(),
            context_id: None,
            task_type: "synthesize_report".into(),
            data: json!({
                "query": "q",
                "previous_results": {
                    "planning": {"topics": ["q"]},
                    "literature_review": {"summary": "found things"}
                }
            }),
            dependencies: vec![],
        };
        let result = SynthesizeReport.handle(&request).await.unwrap();
        assert_eq!(result["title"], "Research report: q");
        assert_eq!(result["stages_used"], 2);
        assert_eq!(result["sections"][0]["stage"], "literature_review");
        assert_eq!(result["sections"][0]["body"], "found things");
    }
}

use super::query_of;
use crate::worker::{HandlerError, TaskHandler, TaskRequest};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Splits a query into sub-questions, one per clause.
pub struct PlanResearch;

const ANGLES: [&str; 3] = [
    "What is the current evidence on",
    "Which methods have been used to study",
    "What gaps remain in the understanding of",
];

#[async_trait]
impl TaskHandler for PlanResearch {
    fn task_type(&self) -> &str {
        "plan_research"
    }

    fn description(&self) -> &str {
        "Break a research query into sub-questions"
    }

    async fn handle(&self, request: &TaskRequest) -> Result<Value, HandlerError> {
        let query = query_of(request)?;

        let topics: Vec<&str> = query
            .split(['?', ';', ','])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();

        let sub_questions: Vec<String> = topics
            .iter()
            .flat_map(|topic| ANGLES.iter().map(move |angle| format!("{angle} {topic}?")))
            .collect();

        Ok(json!({
            "query": query,
            "topics": topics,
            "sub_questions": sub_questions,
        }))
    }
}

use super::{previous_results, query_of};
use crate::worker::{HandlerError, TaskHandler, TaskRequest};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Builds a search plan and a placeholder literature summary for a query.
pub struct ReviewLiterature;

const SOURCES: [&str; 3] = ["pubmed", "semantic_scholar", "arxiv"];

#[async_trait]
impl TaskHandler for ReviewLiterature {
    fn task_type(&self) -> &str {
        "review_literature"
    }

    fn description(&self) -> &str {
        "Plan a literature search and summarise the sources"
    }

    async fn handle(&self, request: &TaskRequest) -> Result<Value, HandlerError> {
        let query = query_of(request)?;

        // Prefer the planner's sub-questions as search terms when available.
        let terms: Vec<String> = previous_results(request)
            .get("planning")
            .and_then(|plan| plan.get("topics"))
            .and_then(Value::as_array)
            .map(|topics| {
                topics
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .filter(|terms: &Vec<String>| !terms.is_empty())
            .unwrap_or_else(|| vec![query.to_string()]);

        let searches: Vec<Value> = SOURCES
            .iter()
            .flat_map(|source| {
                terms
                    .iter()
                    .map(move |term| json!({"source": source, "term": term}))
            })
            .collect();

        Ok(json!({
            "query": query,
            "search_plan": searches,
            "summary": format!(
                "Reviewed {} search terms across {} sources for '{}'",
                terms.len(),
                SOURCES.len(),
                query
            ),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uses_planner_topics_as_terms() {
        let request = TaskRequest {
            task_id: "t".into(),
            context_id: Some("t".into()),
            task_type: "review_literature".into(),
            data: json!({
                "query": "q",
                "previous_results": {"planning": {"topics": ["a", "b"]}}
            }),
            dependencies: vec!["planning".into()],
        };
        let result = ReviewLiterature.handle(&request).await.unwrap();
        assert_eq!(result["search_plan"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_falls_back_to_query() {
        let request = TaskRequest {
            task_id: "t".into(),
            context_id: None,
            task_type: "review_literature".into(),
            data: json!({"query": "vitamin d"}),
            dependencies: vec![],
        };
        let result = ReviewLiterature.handle(&request).await.unwrap();
        assert_eq!(result["search_plan"][0]["term"], "vitamin d");
    }
}

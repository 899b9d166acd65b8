//! HTTP client for the coordinator's operator API.

use crate::coordinator::context::ContextStatus;
use crate::types::{AppError, ResearchRequest, Result, SubmitResponse};
use reqwest::StatusCode;
use std::time::Duration;

pub struct CoordinatorClient {
    base_url: String,
    http: reqwest::Client,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn submit(&self, request: &ResearchRequest) -> Result<SubmitResponse> {
        let response = self
            .http
            .post(format!("{}/api/research", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(request_failed)?;

        if !response.status().is_success() {
            return Err(error_status(response).await);
        }
        response.json().await.map_err(request_failed)
    }

    /// `None` when the coordinator does not know the task (never existed or cleaned up).
    pub async fn status(&self, task_id: &str) -> Result<Option<ContextStatus>> {
        let response = self
            .http
            .get(format!("{}/api/research/{}", self.base_url, task_id))
            .send()
            .await
            .map_err(request_failed)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json().await.map(Some).map_err(request_failed)
            }
            _ => Err(error_status(response).await),
        }
    }

    /// Poll until the task reaches a terminal stage. `on_update` sees every
    /// status that differs from the previous one.
    pub async fn wait_for_terminal(
        &self,
        task_id: &str,
        interval: Duration,
        mut on_update: impl FnMut(&ContextStatus),
    ) -> Result<ContextStatus> {
        let mut last_seen: Option<(usize, String)> = None;
        loop {
            let status = self
                .status(task_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))?;

            let marker = (status.completed_stages.len(), status.stage.to_string());
            if last_seen.as_ref() != Some(&marker) {
                on_update(&status);
                last_seen = Some(marker);
            }
            if status.stage.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

fn request_failed(e: reqwest::Error) -> AppError {
    AppError::Internal(format!("coordinator request failed: {e}"))
}

async fn error_status(response: reqwest::Response) -> AppError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    AppError::Internal(format!("coordinator answered {status}: {body}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn status_body(stage: &str, completed: &[&str]) -> serde_json::Value {
        json!({
            "task_id": "t-1",
            "query": "q",
            "stage": stage,
            "mode": "single_agent",
            "progress": 0.0,
            "completed_stages": completed,
            "failed_stages": [],
            "total_stages": 3,
            "retry_count": 0,
            "max_retries": 3,
            "cost_approved": true,
            "estimated_cost_usd": 0.02,
            "results": {},
            "created_at": "2026-01-01T00:00:00Z",
            "finished_at": null
        })
    }

    #[tokio::test]
    async fn test_status_unknown_task_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/research/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = CoordinatorClient::new(format!("{}/", server.uri()));
        assert!(client.status("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wait_returns_terminal_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/research/t-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(status_body("complete", &["planning", "literature_review", "synthesis"])),
            )
            .mount(&server)
            .await;

        let client = CoordinatorClient::new(server.uri());
        let mut updates = 0;
        let status = client
            .wait_for_terminal("t-1", Duration::from_millis(10), |_| updates += 1)
            .await
            .unwrap();
        assert!(status.stage.is_terminal());
        assert_eq!(updates, 1);
    }

    #[tokio::test]
    async fn test_submit_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/research"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad query"))
            .mount(&server)
            .await;

        let client = CoordinatorClient::new(server.uri());
        let err = client.submit(&ResearchRequest::new("")).await.unwrap_err();
        assert!(err.to_string().contains("bad query"));
    }
}

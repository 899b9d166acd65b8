use crate::{
    AppState,
    coordinator::context::ContextStatus,
    types::{AppError, ResearchRequest, Result, SubmitResponse},
};
use axum::{
    Json,
    extract::{Path, State},
};

/// Submit a research task
///
/// The admission decision is always returned. A task id is present only when
/// the task was admitted and started.
#[utoipa::path(
    post,
    path = "/api/research",
    request_body = ResearchRequest,
    responses(
        (status = 200, description = "Admission decision, plus the started task", body = SubmitResponse),
        (status = 400, description = "Invalid input")
    ),
    tag = "research"
)]
pub async fn submit_research(
    State(state): State<AppState>,
    Json(payload): Json<ResearchRequest>,
) -> Result<Json<SubmitResponse>> {
    let submission = state.orchestrator.submit(payload)?;
    let task_id = submission.task.map(|task| task.task_id);
    let status = task_id
        .as_deref()
        .and_then(|id| state.orchestrator.status(id));

    Ok(Json(SubmitResponse {
        task_id,
        admission: submission.decision,
        status,
    }))
}

/// Status of one research task
#[utoipa::path(
    get,
    path = "/api/research/{task_id}",
    params(("task_id" = String, Path, description = "Research task id")),
    responses(
        (status = 200, description = "Task status", body = ContextStatus),
        (status = 404, description = "Unknown or expired task")
    ),
    tag = "research"
)]
pub async fn get_research(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ContextStatus>> {
    state
        .orchestrator
        .status(&task_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("research task '{}'", task_id)))
}

/// All tracked research tasks, newest first
#[utoipa::path(
    get,
    path = "/api/research",
    responses(
        (status = 200, description = "Tracked tasks", body = Vec<ContextStatus>)
    ),
    tag = "research"
)]
pub async fn list_research(State(state): State<AppState>) -> Json<Vec<ContextStatus>> {
    Json(state.orchestrator.list())
}

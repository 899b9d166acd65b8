use crate::AppState;
use axum::{
    Router,
    routing::{get, post},
};

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(
            "/research",
            post(crate::api::handlers::research::submit_research)
                .get(crate::api::handlers::research::list_research),
        )
        .route(
            "/research/{task_id}",
            get(crate::api::handlers::research::get_research),
        )
        .route("/agents", get(crate::api::handlers::agents::list_agents))
}

//! HTTP API Handlers and Routes
//!
//! # API Endpoints
//!
//! ## Research (`/api/research`)
//! - `POST /api/research` - Submit a task; returns the admission decision
//! - `GET /api/research` - List tracked tasks
//! - `GET /api/research/{task_id}` - Task status (404 once cleaned up)
//!
//! ## Agents (`/api/agents`)
//! - `GET /api/agents` - Registered workers
//!
//! ## Outside `/api`
//! - `GET /health` - Coordinator health
//! - `GET /ws` - Agent protocol WebSocket
//!
//! # OpenAPI Documentation
//!
//! When the `swagger-ui` feature is enabled, interactive API documentation
//! is available at `/swagger-ui/`.

/// Request and response handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;

use crate::AppState;
use axum::{Router, routing::get};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::agents::list_agents,
        handlers::research::submit_research,
        handlers::research::get_research,
        handlers::research::list_research,
    ),
    components(schemas(
        crate::types::ResearchRequest,
        crate::types::ResearchOptions,
        crate::types::SubmitResponse,
        crate::types::CoordinatorHealth,
        crate::coordinator::admission::AdmissionDecision,
        crate::coordinator::context::ContextStatus,
        crate::coordinator::context::ExecutionMode,
        crate::coordinator::directory::AgentRecord,
    )),
    tags(
        (name = "research", description = "Research task submission and status"),
        (name = "agents", description = "Registered workers"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

/// The coordinator's full HTTP surface.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ws", get(handlers::ws::agent_socket))
        .nest("/api", routes::create_router());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

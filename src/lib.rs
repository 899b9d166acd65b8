//! # orrery - multi-agent research orchestration
//!
//! A coordinator admits research tasks, estimates their cost and drives each
//! one through a staged pipeline (planning, literature review, reasoning,
//! execution, synthesis). Stage work runs on independent worker processes,
//! one per agent type, connected over a WebSocket that carries a correlated
//! JSON envelope protocol (`orrery-protocol`).
//!
//! ## Overview
//!
//! orrery can be used in two ways:
//!
//! 1. **As a standalone binary** - `orrery coordinator` and `orrery worker`
//! 2. **As a library** - embed a coordinator, or a worker with your own
//!    task handlers
//!
//! ### Custom worker
//!
//! ```rust,ignore
//! use orrery::{HandlerRegistry, WorkerRuntime};
//! use orrery_protocol::{AgentIdentity, AgentType};
//! use std::sync::Arc;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(Arc::new(MyLiteratureSearch::new()));
//!
//! let identity = AgentIdentity::new("lit-1", AgentType::Literature, registry.task_types());
//! let runtime = WorkerRuntime::new(identity, registry, config.worker.clone())?;
//! runtime.run().await?;
//! ```
//!
//! ### Embedded coordinator
//!
//! ```rust,ignore
//! use orrery::{coordinator, OrreryConfigManager};
//! use std::sync::Arc;
//!
//! let config_manager = Arc::new(OrreryConfigManager::new("orrery.toml")?);
//! let state = coordinator::build_state(config_manager);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! coordinator::serve(listener, state, shutdown_token).await?;
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `swagger-ui` | Serve interactive API docs at `/swagger-ui` |
//!
//! ## Modules
//!
//! - [`transport`] - worker session: connect, register, heartbeat, reconnect
//! - [`rpc`] - inbound dispatch and outbound call correlation
//! - [`worker`] - task handler registry, execution harness, worker runtime
//! - [`coordinator`] - admission gate, orchestration, worker hub
//! - [`agents`] - built-in reference task handlers
//! - [`api`] - operator HTTP API
//! - [`types`] - request/response types and errors
//! - [`utils`] - TOML configuration with hot reload

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

/// Built-in reference task handlers.
pub mod agents;
/// Operator HTTP API.
pub mod api;
/// Command-line interface.
pub mod cli;
/// Coordinator role.
pub mod coordinator;
/// Envelope dispatch and call correlation.
pub mod rpc;
/// Worker-side connection management.
pub mod transport;
/// Core types and errors.
pub mod types;
/// Configuration utilities.
pub mod utils;
/// Worker role.
pub mod worker;

pub use coordinator::{AdmissionDecision, AdmissionGate, Hub, Orchestrator};
pub use rpc::{CallError, Correlator, Dispatcher};
pub use transport::{Session, SessionConfig, TransportError};
pub use types::{AppError, Result};
pub use utils::toml_config::{OrreryConfig, OrreryConfigManager};
pub use worker::{HandlerRegistry, TaskHandler, WorkerRuntime};

use coordinator::AgentDirectory;
use std::sync::Arc;

/// Coordinator state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// TOML configuration with hot-reload support
    pub config_manager: Arc<OrreryConfigManager>,
    /// Registered workers
    pub directory: Arc<AgentDirectory>,
    /// Outbound calls awaiting a worker response
    pub correlator: Arc<Correlator>,
    /// Research task lifecycle
    pub orchestrator: Arc<Orchestrator>,
    /// Worker socket handling
    pub hub: Arc<Hub>,
}

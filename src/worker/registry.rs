//! Task handler trait and the registry a worker dispatches task types through.

use crate::types::{AppError, Result};
use async_trait::async_trait;
use orrery_protocol::{AgentIdentity, RpcError};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A task as the harness hands it to a handler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRequest {
    pub task_id: String,
    pub context_id: Option<String>,
    pub task_type: String,
    pub data: Value,
    pub dependencies: Vec<String>,
}

impl TaskRequest {
    /// Read `task/execute` params. Accepts both the research action shape
    /// (`action`, `payload`) and the plain task shape (`task_type`, `data`).
    pub fn from_params(correlation_id: &str, params: &Value) -> std::result::Result<Self, RpcError> {
        let task_type = first_field(params, &["task_type", "action"])
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RpcError::invalid_params("missing task_type"))?
            .to_string();

        let data = first_field(params, &["data", "payload"])
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));

        let task_id = params
            .get("task_id")
            .and_then(Value::as_str)
            .unwrap_or(correlation_id)
            .to_string();

        let context_id = params
            .get("context_id")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let dependencies = params
            .get("dependencies")
            .and_then(Value::as_array)
            .map(|deps| {
                deps.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            task_id,
            context_id,
            task_type,
            data,
            dependencies,
        })
    }
}

fn first_field<'a>(params: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| params.get(*name))
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Task type this handler executes. Doubles as the advertised capability.
    fn task_type(&self) -> &str;
    fn description(&self) -> &str;
    async fn handle(&self, request: &TaskRequest) -> std::result::Result<Value, HandlerError>;
}

pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.task_type().to_string(), handler);
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn has_handler(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Every advertised capability must have a handler.
    pub fn validate_for(&self, identity: &AgentIdentity) -> Result<()> {
        let missing: Vec<&str> = identity
            .capabilities
            .iter()
            .filter(|capability| !self.has_handler(capability))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::Configuration(format!(
                "agent '{}' advertises capabilities with no handler: {}",
                identity.id,
                missing.join(", ")
            )))
        }
    }
}

//! Wire envelopes and their normalization.
//!
//! Three shapes travel over a connection and are told apart by which fields are present:
//!
//! - **Call**: `{"jsonrpc":"2.0","method":..,"params":..,"id":..}` or the legacy
//!   `{"type":"task_request","task_id":..,"task_type":..,"data":..}`
//! - **Response**: `{"jsonrpc":"2.0","id":..,"result":..}` / `{..,"error":{..}}` or the legacy
//!   `{"type":"task_result","task_id":..,"status":..}`
//! - **Notification**: `{"type":..}` with no id
//!
//! [`Envelope::decode`] turns any of them into one [`Envelope`] value, so nothing past the
//! decode boundary needs to know which shape a peer used. The originating shape is kept in
//! [`WireFormat`] only so that replies go back the way the request came.

use crate::error::{Error, Result};
use crate::notification::Notification;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// JSON-RPC version tag written on every JSON-RPC envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard error codes carried in error responses.
pub mod codes {
    /// The frame was not valid JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// The envelope was not a valid request.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Unknown method or task type.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Params did not match the method.
    pub const INVALID_PARAMS: i64 = -32602;
    /// The handler failed.
    pub const INTERNAL_ERROR: i64 = -32603;
}

const LEGACY_TASK_REQUEST: &str = "task_request";
const LEGACY_TASK_RESULTS: [&str; 2] = ["task_result", "task_response"];

/// Which wire shape a call arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// JSON-RPC 2.0 style.
    #[default]
    JsonRpc,
    /// Flat `task_request` / `task_result` style.
    LegacyTask,
}

/// Structured error carried by an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code, see [`codes`].
    pub code: i64,
    /// Human readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error with a code and message.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// `-32601` for an unknown method or task type.
    pub fn method_not_found(name: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {}", name))
    }

    /// `-32602` for params that do not fit the method.
    pub fn invalid_params(reason: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, reason)
    }

    /// `-32603` for a failure inside a handler.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, reason)
    }

    /// Attach structured detail.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Methods with built-in meaning on the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Run a task on a worker.
    TaskExecute,
    /// Liveness check.
    AgentPing,
    /// Connection and handler summary.
    AgentStatus,
    /// Ask a worker to stop.
    AgentShutdown,
    /// Submit a research task to the coordinator.
    ResearchSubmit,
    /// Query a research task on the coordinator.
    ResearchStatus,
}

impl Method {
    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::TaskExecute => "task/execute",
            Method::AgentPing => "agent/ping",
            Method::AgentStatus => "agent/status",
            Method::AgentShutdown => "agent/shutdown",
            Method::ResearchSubmit => "research/submit",
            Method::ResearchStatus => "research/status",
        }
    }

    /// Look a method up by wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "task/execute" => Some(Method::TaskExecute),
            "agent/ping" => Some(Method::AgentPing),
            "agent/status" => Some(Method::AgentStatus),
            "agent/shutdown" => Some(Method::AgentShutdown),
            "research/submit" => Some(Method::ResearchSubmit),
            "research/status" => Some(Method::ResearchStatus),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request expecting exactly one response with the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Correlation id.
    pub id: String,
    /// Method name as received. May name no known [`Method`].
    pub method: String,
    /// Method params.
    pub params: Value,
    /// Shape the call arrived in.
    pub format: WireFormat,
}

impl Call {
    /// A JSON-RPC call for a known method.
    pub fn new(id: impl Into<String>, method: Method, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.as_str().to_string(),
            params,
            format: WireFormat::JsonRpc,
        }
    }

    /// The known method this call names, if any.
    pub fn known_method(&self) -> Option<Method> {
        Method::parse(&self.method)
    }
}

/// The single answer to a [`Call`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Correlation id of the call being answered.
    pub id: String,
    /// Result value or structured error.
    pub outcome: std::result::Result<Value, RpcError>,
    /// Shape to encode the response in.
    pub format: WireFormat,
}

impl Response {
    /// A successful JSON-RPC response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            outcome: Ok(result),
            format: WireFormat::JsonRpc,
        }
    }

    /// An error JSON-RPC response.
    pub fn error(id: impl Into<String>, error: RpcError) -> Self {
        Self {
            id: id.into(),
            outcome: Err(error),
            format: WireFormat::JsonRpc,
        }
    }

    /// A response to `call`, in the shape the call arrived in.
    pub fn reply_to(call: &Call, outcome: std::result::Result<Value, RpcError>) -> Self {
        Self {
            id: call.id.clone(),
            outcome,
            format: call.format,
        }
    }
}

/// The normalized wire unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Request expecting a response.
    Call(Call),
    /// Answer to an earlier call.
    Response(Response),
    /// One-way message.
    Notification(Notification),
}

impl Envelope {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Normalize an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(Error::NotAnObject);
        };

        if let Some(kind) = obj.get("type").and_then(Value::as_str).map(str::to_owned) {
            if !obj.contains_key("jsonrpc") {
                return Self::from_typed(kind, obj);
            }
        }

        if let Some(method) = obj.get("method").and_then(Value::as_str).map(str::to_owned) {
            let params = obj.remove("params").unwrap_or(Value::Null);
            return match obj.get("id").and_then(id_string) {
                Some(id) => Ok(Envelope::Call(Call {
                    id,
                    method,
                    params,
                    format: WireFormat::JsonRpc,
                })),
                None => Ok(Envelope::Notification(notification_from_method(
                    method, params,
                )?)),
            };
        }

        if obj.contains_key("result") || obj.contains_key("error") {
            let id = obj
                .get("id")
                .and_then(id_string)
                .ok_or(Error::MissingField("id"))?;
            let outcome = match obj.remove("error") {
                Some(error) if !error.is_null() => Err(serde_json::from_value(error)?),
                _ => Ok(obj.remove("result").unwrap_or(Value::Null)),
            };
            return Ok(Envelope::Response(Response {
                id,
                outcome,
                format: WireFormat::JsonRpc,
            }));
        }

        Err(Error::UnknownShape(
            obj.keys().cloned().collect::<Vec<_>>().join(","),
        ))
    }

    fn from_typed(kind: String, mut obj: Map<String, Value>) -> Result<Self> {
        if kind == LEGACY_TASK_REQUEST {
            let id = obj
                .get("task_id")
                .and_then(id_string)
                .ok_or(Error::MissingField("task_id"))?;
            let task_type = obj
                .remove("task_type")
                .ok_or(Error::MissingField("task_type"))?;
            let data = obj.remove("data").unwrap_or_else(|| json!({}));
            return Ok(Envelope::Call(Call {
                id: id.clone(),
                method: Method::TaskExecute.as_str().to_string(),
                params: json!({ "task_id": id, "task_type": task_type, "data": data }),
                format: WireFormat::LegacyTask,
            }));
        }

        if LEGACY_TASK_RESULTS.contains(&kind.as_str()) {
            let id = obj
                .get("task_id")
                .and_then(id_string)
                .ok_or(Error::MissingField("task_id"))?;
            let failed = obj.get("status").and_then(Value::as_str) == Some("error")
                || obj.get("error").is_some_and(|e| !e.is_null());
            let outcome = if failed {
                let code = obj
                    .get("code")
                    .and_then(Value::as_i64)
                    .unwrap_or(codes::INTERNAL_ERROR);
                let message = match obj.remove("error") {
                    Some(Value::String(message)) => message,
                    Some(Value::Null) | None => "task failed".to_string(),
                    Some(other) => other.to_string(),
                };
                let mut error = RpcError::new(code, message);
                error.data = obj.remove("result").filter(|r| !r.is_null());
                Err(error)
            } else {
                Ok(obj.remove("result").unwrap_or(Value::Null))
            };
            return Ok(Envelope::Response(Response {
                id,
                outcome,
                format: WireFormat::LegacyTask,
            }));
        }

        if obj.get("id").is_some_and(|id| !id.is_null()) {
            return Err(Error::UnknownShape(format!("typed envelope '{}' with id", kind)));
        }

        if !Notification::is_known_kind(&kind) {
            return Ok(Envelope::Notification(Notification::Unrecognized { kind }));
        }
        Ok(Envelope::Notification(serde_json::from_value(Value::Object(
            obj,
        ))?))
    }

    /// Correlation id of a call or response.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Envelope::Call(call) => Some(&call.id),
            Envelope::Response(response) => Some(&response.id),
            Envelope::Notification(_) => None,
        }
    }

    /// Render the envelope as a JSON value in its wire shape.
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Envelope::Call(call) => Ok(match call.format {
                WireFormat::JsonRpc => json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "method": call.method,
                    "params": call.params,
                    "id": call.id,
                }),
                WireFormat::LegacyTask => json!({
                    "type": LEGACY_TASK_REQUEST,
                    "task_id": call.id,
                    "task_type": call.params.get("task_type").cloned().unwrap_or(Value::Null),
                    "data": call.params.get("data").cloned().unwrap_or_else(|| json!({})),
                }),
            }),
            Envelope::Response(response) => Ok(match (response.format, &response.outcome) {
                (WireFormat::JsonRpc, Ok(result)) => json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "id": response.id,
                    "result": result,
                }),
                (WireFormat::JsonRpc, Err(error)) => json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "id": response.id,
                    "error": error,
                }),
                (WireFormat::LegacyTask, Ok(result)) => json!({
                    "type": LEGACY_TASK_RESULTS[0],
                    "task_id": response.id,
                    "status": "completed",
                    "result": result,
                }),
                (WireFormat::LegacyTask, Err(error)) => json!({
                    "type": LEGACY_TASK_RESULTS[0],
                    "task_id": response.id,
                    "status": "error",
                    "code": error.code,
                    "error": error.message,
                    "result": error.data,
                }),
            }),
            Envelope::Notification(Notification::Unrecognized { kind }) => Err(
                Error::Unencodable(format!("unrecognized notification '{}'", kind)),
            ),
            Envelope::Notification(notification) => Ok(serde_json::to_value(notification)?),
        }
    }

    /// Encode the envelope as a text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value()?)?)
    }
}

impl From<Notification> for Envelope {
    fn from(notification: Notification) -> Self {
        Envelope::Notification(notification)
    }
}

impl From<Response> for Envelope {
    fn from(response: Response) -> Self {
        Envelope::Response(response)
    }
}

impl From<Call> for Envelope {
    fn from(call: Call) -> Self {
        Envelope::Call(call)
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// JSON-RPC notifications (method, no id) map onto typed notifications by method name.
fn notification_from_method(method: String, params: Value) -> Result<Notification> {
    if !Notification::is_known_kind(&method) {
        return Ok(Notification::Unrecognized { kind: method });
    }
    let mut body = match params {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(Error::InvalidField {
                field: "params",
                reason: format!("expected object, got {}", other),
            })
        }
    };
    body.insert("type".to_string(), Value::String(method));
    Ok(serde_json::from_value(Value::Object(body))?)
}

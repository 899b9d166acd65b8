//! # orrery-protocol
//!
//! Wire-level types shared by the Orrery coordinator and its workers.
//!
//! Every frame on a coordinator/worker connection is a JSON object that decodes into one
//! [`Envelope`]: a [`Call`] expecting exactly one [`Response`] with the same correlation id,
//! or a one-way [`Notification`]. Both JSON-RPC 2.0 style frames and the older flat
//! `task_request` / `task_result` frames are accepted and normalized on decode.
//!
//! ```rust
//! use orrery_protocol::{Envelope, Method};
//!
//! let frame = r#"{"jsonrpc":"2.0","method":"agent/ping","params":{},"id":"42"}"#;
//! match Envelope::decode(frame).unwrap() {
//!     Envelope::Call(call) => assert_eq!(call.known_method(), Some(Method::AgentPing)),
//!     _ => unreachable!(),
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod error;
pub mod notification;
pub mod types;

pub use envelope::{codes, Call, Envelope, Method, Response, RpcError, WireFormat, JSONRPC_VERSION};
pub use error::{Error, Result};
pub use notification::Notification;
pub use types::{
    AgentIdentity, AgentResponse, AgentType, CompletionReport, ParseAgentTypeError,
    ProgressUpdate, Registration, ResearchAction, ResponseStatus, ServiceInfo, Stage,
};

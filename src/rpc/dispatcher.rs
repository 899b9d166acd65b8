//! Routes decoded inbound envelopes.
//!
//! Responses go to the [`Correlator`]. Calls for a known method and
//! notifications of a known type go to the side's [`InboundHandler`]. Calls
//! for an unknown method are answered with METHOD_NOT_FOUND here; malformed
//! frames and unknown notification types are logged and dropped.

use crate::rpc::Correlator;
use crate::transport::Outbox;
use async_trait::async_trait;
use orrery_protocol::{Call, Envelope, Method, Notification, Response, RpcError};
use serde_json::Value;
use std::sync::Arc;

/// Per-side handling of calls and notifications.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Handle a call for a known method. The handler owns replying, and
    /// replies METHOD_NOT_FOUND for methods its side does not serve.
    async fn handle_call(&self, method: Method, call: Call, outbox: &Outbox);

    async fn handle_notification(&self, notification: Notification, outbox: &Outbox);
}

/// What the dispatcher did with one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Resolved,
    DiscardedResponse,
    Call(Method),
    MethodNotFound(String),
    Notification(String),
    IgnoredNotification(String),
    Malformed,
}

pub struct Dispatcher<H: ?Sized> {
    correlator: Arc<Correlator>,
    handler: Arc<H>,
}

impl<H: InboundHandler + ?Sized> Dispatcher<H> {
    pub fn new(correlator: Arc<Correlator>, handler: Arc<H>) -> Self {
        Self {
            correlator,
            handler,
        }
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Decode and route one text frame received on `outbox`'s link.
    pub async fn dispatch(&self, text: &str, outbox: &Outbox) -> Dispatched {
        match Envelope::decode(text) {
            Ok(envelope) => self.route(envelope, outbox).await,
            Err(e) => {
                tracing::warn!(link = outbox.link(), error = %e, "Dropping malformed envelope");
                Dispatched::Malformed
            }
        }
    }

    pub async fn route(&self, envelope: Envelope, outbox: &Outbox) -> Dispatched {
        match envelope {
            Envelope::Response(response) => {
                if self.correlator.resolve(response) {
                    Dispatched::Resolved
                } else {
                    Dispatched::DiscardedResponse
                }
            }
            Envelope::Call(call) => match call.known_method() {
                Some(method) => {
                    tracing::debug!(correlation_id = %call.id, method = %method, "Inbound call");
                    self.handler.handle_call(method, call, outbox).await;
                    Dispatched::Call(method)
                }
                None => {
                    tracing::warn!(correlation_id = %call.id, method = %call.method, "Unknown method");
                    let method = call.method.clone();
                    reply(outbox, &call, Err(RpcError::method_not_found(&method)));
                    Dispatched::MethodNotFound(method)
                }
            },
            Envelope::Notification(Notification::Unrecognized { kind }) => {
                tracing::debug!(kind = %kind, "Ignoring notification of unrecognized type");
                Dispatched::IgnoredNotification(kind)
            }
            Envelope::Notification(notification) => {
                let kind = notification.kind().to_string();
                self.handler.handle_notification(notification, outbox).await;
                Dispatched::Notification(kind)
            }
        }
    }
}

/// Queue the response to `call`. A closed link is logged, not returned.
pub fn reply(outbox: &Outbox, call: &Call, outcome: Result<Value, RpcError>) {
    if let Err(e) = outbox.send(Response::reply_to(call, outcome)) {
        tracing::warn!(correlation_id = %call.id, error = %e, "Could not send response");
    }
}

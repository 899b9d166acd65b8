//! WebSocket transport shared by both sides of the protocol.
//!
//! Every connection gets a [`LinkId`] and an [`Outbox`]. All writes go through
//! the outbox into a single writer task per connection, so frames from
//! concurrent producers never interleave.

pub mod discovery;
pub mod session;

use orrery_protocol::Envelope;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

pub use discovery::{discover_coordinator, websocket_url};
pub use session::{backoff_delay, Connection, ConnectionState, Session, SessionConfig};

/// Identifies one live connection for the lifetime of the process.
pub type LinkId = u64;

static NEXT_LINK: AtomicU64 = AtomicU64::new(1);

fn next_link_id() -> LinkId {
    NEXT_LINK.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection attempts exhausted after {attempts} tries: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: String },

    #[error("Connection closed")]
    Closed,

    #[error("No coordinator candidates configured")]
    NoCoordinator,

    #[error("No pong received within {0:?}")]
    PingTimeout(Duration),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] orrery_protocol::Error),
}

/// A frame queued for the connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Close,
}

/// Write handle for one connection.
#[derive(Debug, Clone)]
pub struct Outbox {
    link: LinkId,
    tx: mpsc::UnboundedSender<Frame>,
}

impl Outbox {
    /// Create an outbox for a new link and the receiver its writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                link: next_link_id(),
                tx,
            },
            rx,
        )
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Encode and queue an envelope.
    pub fn send(&self, envelope: impl Into<Envelope>) -> Result<(), TransportError> {
        let text = envelope.into().encode()?;
        self.send_frame(Frame::Text(text))
    }

    pub fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    /// Whether the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

//! Notifications: one-way envelopes routed by their `type` field.

use crate::types::{CompletionReport, ProgressUpdate, Registration};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A one-way message with no correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Worker → coordinator registration handshake.
    AgentRegister(Registration),
    /// Coordinator → worker answer to a registration.
    RegistrationAck {
        /// Registered agent id.
        agent_id: String,
        /// Whether the coordinator accepted the registration.
        accepted: bool,
        /// Reason for a refusal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Worker → coordinator best-effort goodbye.
    AgentUnregister {
        /// Departing agent id.
        agent_id: String,
    },
    /// Worker → coordinator liveness signal.
    Heartbeat {
        /// Sending agent id.
        agent_id: String,
        /// Send time.
        timestamp: DateTime<Utc>,
    },
    /// Coordinator → worker heartbeat acknowledgement.
    HeartbeatAck {
        /// Acknowledgement time.
        timestamp: DateTime<Utc>,
    },
    /// Application-level ping.
    Ping {
        /// Send time.
        timestamp: DateTime<Utc>,
    },
    /// Application-level pong.
    Pong {
        /// Send time.
        timestamp: DateTime<Utc>,
    },
    /// Coordinator progress report for a research task.
    ResearchProgress(ProgressUpdate),
    /// Coordinator terminal report for a research task.
    ResearchCompleted(CompletionReport),
    /// A notification whose `type` this build does not know. Never encoded.
    #[serde(skip)]
    Unrecognized {
        /// The unknown `type` value.
        kind: String,
    },
}

impl Notification {
    /// `type` values this build can decode.
    pub const KNOWN_KINDS: [&'static str; 9] = [
        "agent_register",
        "registration_ack",
        "agent_unregister",
        "heartbeat",
        "heartbeat_ack",
        "ping",
        "pong",
        "research_progress",
        "research_completed",
    ];

    /// Whether `kind` names a known notification type.
    pub fn is_known_kind(kind: &str) -> bool {
        Self::KNOWN_KINDS.contains(&kind)
    }

    /// The `type` value of this notification.
    pub fn kind(&self) -> &str {
        match self {
            Notification::AgentRegister(_) => "agent_register",
            Notification::RegistrationAck { .. } => "registration_ack",
            Notification::AgentUnregister { .. } => "agent_unregister",
            Notification::Heartbeat { .. } => "heartbeat",
            Notification::HeartbeatAck { .. } => "heartbeat_ack",
            Notification::Ping { .. } => "ping",
            Notification::Pong { .. } => "pong",
            Notification::ResearchProgress(_) => "research_progress",
            Notification::ResearchCompleted(_) => "research_completed",
            Notification::Unrecognized { kind } => kind,
        }
    }

    /// A heartbeat stamped now.
    pub fn heartbeat(agent_id: impl Into<String>) -> Self {
        Notification::Heartbeat {
            agent_id: agent_id.into(),
            timestamp: Utc::now(),
        }
    }
}

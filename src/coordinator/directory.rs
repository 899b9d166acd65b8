//! Registered workers and how to reach them.

use crate::transport::{Frame, LinkId, Outbox};
use chrono::{DateTime, Utc};
use orrery_protocol::{AgentType, Registration, ServiceInfo};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use utoipa::ToSchema;

/// One registered worker.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AgentRecord {
    pub agent_id: String,
    #[schema(value_type = String)]
    pub agent_type: AgentType,
    pub capabilities: Vec<String>,
    #[schema(value_type = Option<Object>)]
    pub service_info: Option<ServiceInfo>,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub dispatched: u64,
    #[serde(skip)]
    last_seen: Instant,
    #[serde(skip)]
    last_dispatched: Option<Instant>,
    #[serde(skip)]
    outbox: Outbox,
}

impl AgentRecord {
    pub fn link(&self) -> LinkId {
        self.outbox.link()
    }

    /// Close the worker's socket so it reconnects and registers again.
    /// Returns false when the link is already gone.
    pub fn close_link(&self) -> bool {
        self.outbox.send_frame(Frame::Close).is_ok()
    }
}

#[derive(Default)]
pub struct AgentDirectory {
    agents: RwLock<HashMap<String, AgentRecord>>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or re-register a worker on the link behind `outbox`.
    /// Returns the record it replaced.
    pub fn register(&self, registration: Registration, outbox: Outbox) -> Option<AgentRecord> {
        let now = Utc::now();
        let record = AgentRecord {
            agent_id: registration.agent_id.clone(),
            agent_type: registration.agent_type,
            capabilities: registration.capabilities,
            service_info: registration.service_info,
            registered_at: now,
            last_seen_at: now,
            dispatched: 0,
            last_seen: Instant::now(),
            last_dispatched: None,
            outbox,
        };
        let previous = self.agents.write().insert(registration.agent_id, record);
        if let Some(previous) = &previous {
            tracing::info!(
                agent_id = %previous.agent_id,
                old_link = previous.link(),
                "Agent re-registered, replacing previous connection"
            );
        }
        previous
    }

    pub fn unregister(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.write().remove(agent_id)
    }

    /// Drop every worker registered on `link`. Returns their ids.
    pub fn remove_link(&self, link: LinkId) -> Vec<String> {
        let mut agents = self.agents.write();
        let ids: Vec<String> = agents
            .values()
            .filter(|record| record.link() == link)
            .map(|record| record.agent_id.clone())
            .collect();
        for id in &ids {
            agents.remove(id);
        }
        ids
    }

    /// Record liveness. Returns false for unknown agents.
    pub fn touch(&self, agent_id: &str) -> bool {
        match self.agents.write().get_mut(agent_id) {
            Some(record) => {
                record.last_seen = Instant::now();
                record.last_seen_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Pick a connected worker of `agent_type`, preferring the one that was
    /// dispatched to least recently, and mark it dispatched.
    pub fn select(&self, agent_type: AgentType) -> Option<(String, Outbox)> {
        let mut agents = self.agents.write();
        let record = agents
            .values_mut()
            .filter(|record| record.agent_type == agent_type && !record.outbox.is_closed())
            .min_by(|a, b| {
                a.last_dispatched
                    .cmp(&b.last_dispatched)
                    .then_with(|| a.agent_id.cmp(&b.agent_id))
            })?;

        record.last_dispatched = Some(Instant::now());
        record.dispatched += 1;
        Some((record.agent_id.clone(), record.outbox.clone()))
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.read().get(agent_id).cloned()
    }

    /// All workers, sorted by id.
    pub fn list(&self) -> Vec<AgentRecord> {
        let mut records: Vec<AgentRecord> = self.agents.read().values().cloned().collect();
        records.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        records
    }

    pub fn count_of(&self, agent_type: AgentType) -> usize {
        self.agents
            .read()
            .values()
            .filter(|record| record.agent_type == agent_type)
            .count()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Remove workers silent for longer than `max_silence`.
    pub fn evict_stale(&self, max_silence: Duration) -> Vec<AgentRecord> {
        let mut agents = self.agents.write();
        let stale: Vec<String> = agents
            .values()
            .filter(|record| record.last_seen.elapsed() > max_silence)
            .map(|record| record.agent_id.clone())
            .collect();
        stale.iter().filter_map(|id| agents.remove(id)).collect()
    }
}

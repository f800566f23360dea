use std::collections::HashMap;

use ajo_core::{DomainEvent, DomainEventKind, EventEnvelope, EventStore, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct EventLog {
    last_sequence: i64,
    by_group: HashMap<Uuid, Vec<EventEnvelope>>,
}

/// Append-only rotation event log. Sequence numbers are global across groups.
#[derive(Default)]
pub struct InMemoryEventStore {
    log: RwLock<EventLog>,
}

impl InMemoryEventStore {
    /// Kinds recorded for one group, oldest first.
    pub async fn kinds(&self, group_id: Uuid) -> Vec<DomainEventKind> {
        let log = self.log.read().await;
        log.by_group
            .get(&group_id)
            .map(|events| events.iter().map(|envelope| envelope.event.kind).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, group_id: Uuid, event: DomainEvent) -> Result<EventEnvelope> {
        let mut log = self.log.write().await;
        log.last_sequence += 1;

        let envelope = EventEnvelope {
            sequence: log.last_sequence,
            stream_id: group_id,
            event,
            stored_at: Utc::now(),
        };
        log.by_group
            .entry(group_id)
            .or_default()
            .push(envelope.clone());

        Ok(envelope)
    }

    async fn stream(&self, group_id: Uuid) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log.by_group.get(&group_id).cloned().unwrap_or_default())
    }
}

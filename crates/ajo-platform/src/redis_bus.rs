use ajo_core::{DomainEvent, EventEnvelope, EventStore};
use anyhow::Result;
use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::contracts::RotationEventMessage;

pub const EVENTS_CHANNEL: &str = "ajo.events";

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let _: i64 = connection.publish(channel, serialized).await?;
        Ok(())
    }
}

/// Event store decorator that fans committed events out on [`EVENTS_CHANNEL`].
///
/// The inner append decides success; a failed publish is logged and dropped.
pub struct PublishingEventStore<E> {
    inner: E,
    bus: RedisBus,
}

impl<E> PublishingEventStore<E> {
    pub fn new(inner: E, bus: RedisBus) -> Self {
        Self { inner, bus }
    }
}

#[async_trait]
impl<E: EventStore> EventStore for PublishingEventStore<E> {
    async fn append(&self, stream_id: Uuid, event: DomainEvent) -> ajo_core::Result<EventEnvelope> {
        let envelope = self.inner.append(stream_id, event).await?;

        let message = RotationEventMessage::from(&envelope);
        if let Err(err) = self.bus.publish_json(EVENTS_CHANNEL, &message).await {
            warn!(
                group_id = %stream_id,
                sequence = envelope.sequence,
                error = %err,
                "failed to publish rotation event"
            );
        }

        Ok(envelope)
    }

    async fn stream(&self, stream_id: Uuid) -> ajo_core::Result<Vec<EventEnvelope>> {
        self.inner.stream(stream_id).await
    }
}

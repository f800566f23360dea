use ajo_core::{DomainEventKind, EventEnvelope, RotationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRequest {
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderRequest {
    pub actor_id: Uuid,
    /// Member ids, first recipient first.
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionReportQuery {
    /// Instant to evaluate lateness at; defaults to now.
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&RotationError> for ErrorBody {
    fn from(err: &RotationError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Payload published on the events channel after a committed transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationEventMessage {
    pub event_id: Uuid,
    pub group_id: Uuid,
    pub sequence: i64,
    pub kind: DomainEventKind,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl From<&EventEnvelope> for RotationEventMessage {
    fn from(envelope: &EventEnvelope) -> Self {
        Self {
            event_id: envelope.event.id,
            group_id: envelope.stream_id,
            sequence: envelope.sequence,
            kind: envelope.event.kind,
            occurred_at: envelope.event.occurred_at,
            payload: envelope.event.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ajo_core::DomainEvent;
    use serde_json::json;

    #[test]
    fn test_error_body_carries_kind() {
        let body = ErrorBody::from(&RotationError::Conflict("already paid".to_string()));
        assert_eq!(body.kind, "conflict");
        assert_eq!(body.message, "conflict: already paid");
    }

    #[test]
    fn test_event_message_from_envelope() {
        let group_id = Uuid::new_v4();
        let event = DomainEvent::new(
            group_id,
            DomainEventKind::PayoutReleased,
            json!({ "cycle": 1 }),
        );
        let envelope = EventEnvelope {
            sequence: 7,
            stream_id: group_id,
            event: event.clone(),
            stored_at: Utc::now(),
        };

        let message = RotationEventMessage::from(&envelope);
        assert_eq!(message.event_id, event.id);
        assert_eq!(message.group_id, group_id);
        assert_eq!(message.sequence, 7);
        assert_eq!(message.payload["cycle"], 1);
    }
}

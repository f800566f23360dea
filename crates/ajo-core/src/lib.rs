pub mod error;
pub mod events;
pub mod models;
pub mod risk;
pub mod storage;

pub use error::{Result, RotationError};
pub use events::{DomainEvent, DomainEventKind};
pub use models::{
    ContributionObligation, Frequency, GroupConfig, GroupStatus, MAX_PARTICIPANTS,
    MIN_PARTICIPANTS, Member, PaymentRecord, Payout, PayoutPosition, PayoutStatus,
    ReliabilitySnapshot, SettlementState, paid_after_due,
};
pub use risk::{RiskPolicy, RiskTier, StandardRiskPolicy};
pub use storage::{EventEnvelope, EventStore, RotationStore};

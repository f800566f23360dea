use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::Result;
use crate::events::DomainEvent;
use crate::models::{
    ContributionObligation, GroupConfig, GroupStatus, Member, PaymentRecord, Payout, PayoutPosition,
};

#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub sequence: i64,
    pub stream_id: Uuid,
    pub event: DomainEvent,
    pub stored_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, stream_id: Uuid, event: DomainEvent) -> Result<EventEnvelope>;
    async fn stream(&self, stream_id: Uuid) -> Result<Vec<EventEnvelope>>;
}

/// Persistence contract the scheduler needs from the group data store.
///
/// Every mutating call is all-or-nothing. Conditional writes report a lost race as
/// `RotationError::Conflict` and a locked aggregate as `RotationError::PermissionDenied`.
#[async_trait]
pub trait RotationStore: Send + Sync {
    async fn fetch_group(&self, group_id: Uuid) -> Result<GroupConfig>;

    /// Members ordered by join time.
    async fn fetch_members(&self, group_id: Uuid) -> Result<Vec<Member>>;

    async fn fetch_historical_obligations(
        &self,
        user_ids: &[Uuid],
        exclude_group_id: Uuid,
    ) -> Result<Vec<PaymentRecord>>;

    /// Rejected with `PermissionDenied` once the order is finalized.
    async fn persist_payout_positions(
        &self,
        group_id: Uuid,
        positions: &[PayoutPosition],
    ) -> Result<()>;

    /// Compare-and-set of the finalized flag from `false` to `true`.
    async fn set_order_finalized(&self, group_id: Uuid) -> Result<()>;

    /// Moves the group from recruiting to active and inserts the obligations as one unit.
    async fn activate_with_obligations(
        &self,
        group_id: Uuid,
        obligations: &[ContributionObligation],
    ) -> Result<()>;

    /// Conditional status move; `Conflict` when the group is no longer in `from`.
    async fn transition_status(&self, group_id: Uuid, from: GroupStatus, to: GroupStatus)
    -> Result<()>;

    async fn fetch_obligations(
        &self,
        group_id: Uuid,
        cycle: Option<u32>,
    ) -> Result<Vec<ContributionObligation>>;

    async fn fetch_payouts(&self, group_id: Uuid) -> Result<Vec<Payout>>;

    /// Records a completed payout, unique per `(group_id, cycle)`.
    async fn insert_payout(
        &self,
        group_id: Uuid,
        cycle: u32,
        recipient_user_id: Uuid,
        amount: Decimal,
    ) -> Result<Payout>;
}

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, RotationError};

pub const MIN_PARTICIPANTS: u32 = 2;
pub const MAX_PARTICIPANTS: u32 = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    /// Single lump-sum contribution per member.
    #[serde(rename = "every")]
    OneTime,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::OneTime => "every",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "every" | "one_time" => Ok(Frequency::OneTime),
            other => Err(RotationError::Validation(format!(
                "unknown frequency {other}"
            ))),
        }
    }

    pub fn is_lump_sum(self) -> bool {
        matches!(self, Frequency::OneTime)
    }

    /// One payout slot per member, except lump-sum groups which settle in a single cycle.
    pub fn total_cycles(self, member_count: usize) -> u32 {
        if self.is_lump_sum() {
            1
        } else {
            member_count as u32
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Recruiting,
    Active,
    Completed,
    Cancelled,
}

impl GroupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupStatus::Recruiting => "recruiting",
            GroupStatus::Active => "active",
            GroupStatus::Completed => "completed",
            GroupStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "recruiting" => Ok(GroupStatus::Recruiting),
            "active" => Ok(GroupStatus::Active),
            "completed" => Ok(GroupStatus::Completed),
            "cancelled" => Ok(GroupStatus::Cancelled),
            other => Err(RotationError::Store(format!("unknown group status {other}"))),
        }
    }

    pub fn can_transition_to(self, next: GroupStatus) -> bool {
        matches!(
            (self, next),
            (GroupStatus::Recruiting, GroupStatus::Active)
                | (GroupStatus::Recruiting, GroupStatus::Cancelled)
                | (GroupStatus::Active, GroupStatus::Completed)
                | (GroupStatus::Active, GroupStatus::Cancelled)
        )
    }
}

/// Aggregate root for a rotating savings group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub name: String,
    pub contribution_amount: Decimal,
    pub frequency: Frequency,
    pub max_participants: u32,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub payout_order_finalized: bool,
    pub status: GroupStatus,
    pub created_at: DateTime<Utc>,
}

impl GroupConfig {
    pub fn validate(&self) -> Result<()> {
        if self.contribution_amount <= Decimal::ZERO {
            return Err(RotationError::Validation(
                "contribution_amount must be positive".to_string(),
            ));
        }
        if !(MIN_PARTICIPANTS..=MAX_PARTICIPANTS).contains(&self.max_participants) {
            return Err(RotationError::Validation(format!(
                "max_participants must be between {MIN_PARTICIPANTS} and {MAX_PARTICIPANTS}, found {}",
                self.max_participants
            )));
        }
        if let Some(end_date) = self.end_date {
            if end_date < self.start_date {
                return Err(RotationError::Validation(
                    "end_date must not precede start_date".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Amount pooled per cycle once the roster is full.
    pub fn pot_size(&self) -> Decimal {
        self.contribution_amount * Decimal::from(self.max_participants)
    }

    pub fn is_creator(&self, user_id: Uuid) -> bool {
        self.creator_id == user_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: Uuid,
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub payout_position: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayoutPosition {
    pub member_id: Uuid,
    pub position: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
    Pending,
    Paid,
    /// Paid after the due date.
    Late,
    Missed,
}

impl SettlementState {
    pub fn as_str(self) -> &'static str {
        match self {
            SettlementState::Pending => "pending",
            SettlementState::Paid => "paid",
            SettlementState::Late => "late",
            SettlementState::Missed => "missed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(SettlementState::Pending),
            "paid" => Ok(SettlementState::Paid),
            "late" => Ok(SettlementState::Late),
            "missed" => Ok(SettlementState::Missed),
            other => Err(RotationError::Store(format!(
                "unknown settlement state {other}"
            ))),
        }
    }

    /// Settlement only moves forward out of `Pending`.
    pub fn can_transition_to(self, next: SettlementState) -> bool {
        self == SettlementState::Pending && next != SettlementState::Pending
    }

    /// Money for the obligation has been received, on time or not.
    pub fn is_collected(self) -> bool {
        matches!(self, SettlementState::Paid | SettlementState::Late)
    }
}

/// True when a payment landed on a calendar day after its due date.
pub fn paid_after_due(due_date: NaiveDate, paid_at: DateTime<Utc>) -> bool {
    paid_at.date_naive() > due_date
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContributionObligation {
    pub id: Uuid,
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub cycle_number: u32,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub state: SettlementState,
    pub paid_at: Option<DateTime<Utc>>,
}

impl ContributionObligation {
    pub fn pending(
        group_id: Uuid,
        user_id: Uuid,
        cycle_number: u32,
        amount: Decimal,
        due_date: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            user_id,
            cycle_number,
            amount,
            due_date,
            state: SettlementState::Pending,
            paid_at: None,
        }
    }

    pub fn is_collected(&self) -> bool {
        self.state.is_collected()
    }

    /// A stored `late` state and a `paid` row with a post-due timestamp mean the same thing.
    pub fn paid_late(&self) -> bool {
        match (self.state, self.paid_at) {
            (SettlementState::Late, _) => true,
            (SettlementState::Paid, Some(paid_at)) => paid_after_due(self.due_date, paid_at),
            _ => false,
        }
    }
}

/// A member's obligation in some other group, as consumed by the reliability scorer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentRecord {
    pub user_id: Uuid,
    pub group_id: Uuid,
    pub state: SettlementState,
    pub due_date: NaiveDate,
    pub paid_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    pub fn was_paid_late(&self) -> bool {
        match (self.state, self.paid_at) {
            (SettlementState::Late, _) => true,
            (SettlementState::Paid, Some(paid_at)) => paid_after_due(self.due_date, paid_at),
            _ => false,
        }
    }
}

impl From<&ContributionObligation> for PaymentRecord {
    fn from(obligation: &ContributionObligation) -> Self {
        Self {
            user_id: obligation.user_id,
            group_id: obligation.group_id,
            state: obligation.state,
            due_date: obligation.due_date,
            paid_at: obligation.paid_at,
        }
    }
}

/// Derived view of a member's payment history; never a source of truth.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ReliabilitySnapshot {
    pub user_id: Uuid,
    /// Percentage in `[0, 100]`; `0.0` when there is no history.
    pub late_rate: f64,
    pub total_payments: u32,
    pub late_payments: u32,
    pub distinct_groups: u32,
}

impl ReliabilitySnapshot {
    pub fn no_history(user_id: Uuid) -> Self {
        Self {
            user_id,
            late_rate: 0.0,
            total_payments: 0,
            late_payments: 0,
            distinct_groups: 0,
        }
    }

    pub fn has_history(&self) -> bool {
        self.total_payments > 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Completed,
}

impl PayoutStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(PayoutStatus::Pending),
            "completed" => Ok(PayoutStatus::Completed),
            other => Err(RotationError::Store(format!("unknown payout status {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payout {
    pub id: Uuid,
    pub group_id: Uuid,
    pub cycle_number: u32,
    pub recipient_user_id: Uuid,
    pub amount: Decimal,
    pub status: PayoutStatus,
    pub created_at: DateTime<Utc>,
}

impl Payout {
    pub fn is_completed(&self) -> bool {
        self.status == PayoutStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn group() -> GroupConfig {
        GroupConfig {
            id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            name: "Market women".to_string(),
            contribution_amount: Decimal::new(5000, 0),
            frequency: Frequency::Weekly,
            max_participants: 3,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: None,
            payout_order_finalized: false,
            status: GroupStatus::Recruiting,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_group_validation_bounds() {
        assert!(group().validate().is_ok());

        let mut g = group();
        g.max_participants = 1;
        assert!(matches!(g.validate(), Err(RotationError::Validation(_))));

        g.max_participants = 51;
        assert!(matches!(g.validate(), Err(RotationError::Validation(_))));

        let mut g = group();
        g.contribution_amount = Decimal::ZERO;
        assert!(g.validate().is_err());

        let mut g = group();
        g.end_date = NaiveDate::from_ymd_opt(2023, 12, 31);
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_pot_size() {
        assert_eq!(group().pot_size(), Decimal::new(15000, 0));
    }

    #[test]
    fn test_settlement_transitions_forward_only() {
        use SettlementState::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Late));
        assert!(Pending.can_transition_to(Missed));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Late.can_transition_to(Paid));
        assert!(!Missed.can_transition_to(Paid));
    }

    #[test]
    fn test_stored_and_derived_late_agree() {
        let due = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let mut obligation =
            ContributionObligation::pending(Uuid::new_v4(), Uuid::new_v4(), 2, Decimal::ONE, due);

        obligation.state = SettlementState::Paid;
        obligation.paid_at = Some(Utc.with_ymd_and_hms(2024, 1, 8, 23, 0, 0).unwrap());
        assert!(!obligation.paid_late());

        obligation.paid_at = Some(Utc.with_ymd_and_hms(2024, 1, 9, 0, 30, 0).unwrap());
        assert!(obligation.paid_late());

        let as_late = ContributionObligation {
            state: SettlementState::Late,
            ..obligation.clone()
        };
        assert_eq!(as_late.paid_late(), obligation.paid_late());
        assert!(as_late.is_collected());
        assert_eq!(
            PaymentRecord::from(&as_late).was_paid_late(),
            PaymentRecord::from(&obligation).was_paid_late()
        );
    }

    #[test]
    fn test_frequency_wire_names() {
        assert_eq!(serde_json::to_string(&Frequency::OneTime).unwrap(), "\"every\"");
        assert_eq!(Frequency::parse("Weekly").unwrap(), Frequency::Weekly);
        assert_eq!(Frequency::OneTime.total_cycles(7), 1);
        assert_eq!(Frequency::Monthly.total_cycles(7), 7);
        assert!(Frequency::parse("yearly").is_err());
    }

    #[test]
    fn test_group_status_transitions() {
        assert!(GroupStatus::Recruiting.can_transition_to(GroupStatus::Active));
        assert!(GroupStatus::Recruiting.can_transition_to(GroupStatus::Cancelled));
        assert!(!GroupStatus::Active.can_transition_to(GroupStatus::Recruiting));
        assert!(!GroupStatus::Completed.can_transition_to(GroupStatus::Active));
    }
}

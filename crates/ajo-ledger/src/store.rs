use std::collections::{HashMap, HashSet};

use ajo_core::{
    ContributionObligation, GroupConfig, GroupStatus, Member, PaymentRecord, Payout,
    PayoutPosition, PayoutStatus, Result, RotationError, RotationStore, SettlementState,
    paid_after_due,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    groups: HashMap<Uuid, GroupConfig>,
    members: HashMap<Uuid, Vec<Member>>,
    obligations: Vec<ContributionObligation>,
    payouts: HashMap<(Uuid, u32), Payout>,
}

impl LedgerState {
    fn group(&self, group_id: Uuid) -> Result<&GroupConfig> {
        self.groups
            .get(&group_id)
            .ok_or_else(|| RotationError::not_found("group", group_id))
    }

    fn group_mut(&mut self, group_id: Uuid) -> Result<&mut GroupConfig> {
        self.groups
            .get_mut(&group_id)
            .ok_or_else(|| RotationError::not_found("group", group_id))
    }
}

/// Rotation store held behind a single lock, so every write is atomic with its guard check.
#[derive(Default)]
pub struct InMemoryRotationStore {
    state: RwLock<LedgerState>,
}

impl InMemoryRotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_group(&self, group: GroupConfig) -> Result<()> {
        group.validate()?;
        let mut state = self.state.write().await;
        if state.groups.contains_key(&group.id) {
            return Err(RotationError::Conflict(format!(
                "group {} already exists",
                group.id
            )));
        }
        state.members.entry(group.id).or_default();
        state.groups.insert(group.id, group);
        Ok(())
    }

    /// Admits a member to a recruiting group with free seats.
    pub async fn add_member(
        &self,
        group_id: Uuid,
        user_id: Uuid,
        joined_at: DateTime<Utc>,
    ) -> Result<Member> {
        let mut state = self.state.write().await;
        let group = state.group(group_id)?;
        if group.status != GroupStatus::Recruiting {
            return Err(RotationError::PreconditionFailed(format!(
                "group is {}, not recruiting",
                group.status.as_str()
            )));
        }
        let max_participants = group.max_participants as usize;

        let roster = state.members.entry(group_id).or_default();
        if roster.len() >= max_participants {
            return Err(RotationError::PreconditionFailed("group is full".to_string()));
        }
        if roster.iter().any(|member| member.user_id == user_id) {
            return Err(RotationError::Conflict(format!(
                "user {user_id} is already a member"
            )));
        }

        let member = Member {
            id: Uuid::new_v4(),
            group_id,
            user_id,
            joined_at,
            payout_position: None,
        };
        roster.push(member.clone());
        Ok(member)
    }

    /// Loads obligations from other groups, e.g. payment history.
    pub async fn seed_obligations(&self, obligations: Vec<ContributionObligation>) {
        let mut state = self.state.write().await;
        state.obligations.extend(obligations);
    }

    /// Applies a forward-only settlement transition to one obligation.
    pub async fn settle_obligation(
        &self,
        obligation_id: Uuid,
        next: SettlementState,
        paid_at: Option<DateTime<Utc>>,
    ) -> Result<ContributionObligation> {
        let mut state = self.state.write().await;
        let obligation = state
            .obligations
            .iter_mut()
            .find(|obligation| obligation.id == obligation_id)
            .ok_or_else(|| RotationError::not_found("obligation", obligation_id))?;

        if !obligation.state.can_transition_to(next) {
            return Err(RotationError::Conflict(format!(
                "obligation is already {}",
                obligation.state.as_str()
            )));
        }

        match (next, paid_at) {
            (SettlementState::Paid, None) | (SettlementState::Late, None) => {
                return Err(RotationError::Validation(
                    "paid_at is required for a collected obligation".to_string(),
                ));
            }
            (SettlementState::Late, Some(at)) if !paid_after_due(obligation.due_date, at) => {
                return Err(RotationError::Validation(
                    "late settlement must be paid after the due date".to_string(),
                ));
            }
            (SettlementState::Missed, Some(_)) => {
                return Err(RotationError::Validation(
                    "missed obligation cannot carry paid_at".to_string(),
                ));
            }
            _ => {}
        }

        obligation.state = next;
        obligation.paid_at = paid_at;
        debug!(obligation_id = %obligation_id, state = next.as_str(), "obligation settled");
        Ok(obligation.clone())
    }

    /// Stages a payout that has been initiated but not yet completed.
    pub async fn record_pending_payout(
        &self,
        group_id: Uuid,
        cycle: u32,
        recipient_user_id: Uuid,
        amount: Decimal,
    ) -> Result<Payout> {
        let mut state = self.state.write().await;
        state.group(group_id)?;
        if state.payouts.contains_key(&(group_id, cycle)) {
            return Err(RotationError::Conflict(format!(
                "payout for cycle {cycle} already exists"
            )));
        }

        let payout = Payout {
            id: Uuid::new_v4(),
            group_id,
            cycle_number: cycle,
            recipient_user_id,
            amount,
            status: PayoutStatus::Pending,
            created_at: Utc::now(),
        };
        state.payouts.insert((group_id, cycle), payout.clone());
        Ok(payout)
    }
}

#[async_trait]
impl RotationStore for InMemoryRotationStore {
    async fn fetch_group(&self, group_id: Uuid) -> Result<GroupConfig> {
        let state = self.state.read().await;
        state.group(group_id).cloned()
    }

    async fn fetch_members(&self, group_id: Uuid) -> Result<Vec<Member>> {
        let state = self.state.read().await;
        state.group(group_id)?;

        let mut members = state.members.get(&group_id).cloned().unwrap_or_default();
        members.sort_by_key(|member| member.joined_at);
        Ok(members)
    }

    async fn fetch_historical_obligations(
        &self,
        user_ids: &[Uuid],
        exclude_group_id: Uuid,
    ) -> Result<Vec<PaymentRecord>> {
        let wanted: HashSet<Uuid> = user_ids.iter().copied().collect();
        let state = self.state.read().await;

        Ok(state
            .obligations
            .iter()
            .filter(|obligation| obligation.group_id != exclude_group_id)
            .filter(|obligation| wanted.contains(&obligation.user_id))
            .map(PaymentRecord::from)
            .collect())
    }

    async fn persist_payout_positions(
        &self,
        group_id: Uuid,
        positions: &[PayoutPosition],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if state.group(group_id)?.payout_order_finalized {
            return Err(RotationError::PermissionDenied(
                "payout order is finalized".to_string(),
            ));
        }

        let roster = state.members.entry(group_id).or_default();
        if let Some(unknown) = positions
            .iter()
            .find(|entry| !roster.iter().any(|member| member.id == entry.member_id))
        {
            return Err(RotationError::Validation(format!(
                "member {} does not belong to group {group_id}",
                unknown.member_id
            )));
        }

        for entry in positions {
            if let Some(member) = roster.iter_mut().find(|member| member.id == entry.member_id) {
                member.payout_position = Some(entry.position);
            }
        }
        Ok(())
    }

    async fn set_order_finalized(&self, group_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let group = state.group_mut(group_id)?;
        if group.payout_order_finalized {
            return Err(RotationError::Conflict(
                "payout order already finalized".to_string(),
            ));
        }
        group.payout_order_finalized = true;
        Ok(())
    }

    async fn activate_with_obligations(
        &self,
        group_id: Uuid,
        obligations: &[ContributionObligation],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let group = state.group_mut(group_id)?;
        if group.status != GroupStatus::Recruiting {
            return Err(RotationError::Conflict(format!(
                "schedule already generated; group is {}",
                group.status.as_str()
            )));
        }
        if !group.payout_order_finalized {
            return Err(RotationError::PreconditionFailed(
                "payout order is not finalized".to_string(),
            ));
        }

        group.status = GroupStatus::Active;
        state.obligations.extend(obligations.iter().cloned());
        Ok(())
    }

    async fn transition_status(
        &self,
        group_id: Uuid,
        from: GroupStatus,
        to: GroupStatus,
    ) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(RotationError::Validation(format!(
                "cannot move a group from {} to {}",
                from.as_str(),
                to.as_str()
            )));
        }

        let mut state = self.state.write().await;
        let group = state.group_mut(group_id)?;
        if group.status != from {
            return Err(RotationError::Conflict(format!(
                "group is {}, expected {}",
                group.status.as_str(),
                from.as_str()
            )));
        }
        group.status = to;
        Ok(())
    }

    async fn fetch_obligations(
        &self,
        group_id: Uuid,
        cycle: Option<u32>,
    ) -> Result<Vec<ContributionObligation>> {
        let state = self.state.read().await;
        state.group(group_id)?;

        let mut obligations: Vec<ContributionObligation> = state
            .obligations
            .iter()
            .filter(|obligation| obligation.group_id == group_id)
            .filter(|obligation| cycle.is_none_or(|cycle| obligation.cycle_number == cycle))
            .cloned()
            .collect();
        obligations.sort_by_key(|obligation| obligation.cycle_number);
        Ok(obligations)
    }

    async fn fetch_payouts(&self, group_id: Uuid) -> Result<Vec<Payout>> {
        let state = self.state.read().await;
        state.group(group_id)?;

        let mut payouts: Vec<Payout> = state
            .payouts
            .values()
            .filter(|payout| payout.group_id == group_id)
            .cloned()
            .collect();
        payouts.sort_by_key(|payout| payout.cycle_number);
        Ok(payouts)
    }

    async fn insert_payout(
        &self,
        group_id: Uuid,
        cycle: u32,
        recipient_user_id: Uuid,
        amount: Decimal,
    ) -> Result<Payout> {
        let mut state = self.state.write().await;
        state.group(group_id)?;

        let payout = match state.payouts.get(&(group_id, cycle)) {
            Some(existing) if existing.is_completed() => {
                return Err(RotationError::Conflict("already paid".to_string()));
            }
            Some(existing) => Payout {
                recipient_user_id,
                amount,
                status: PayoutStatus::Completed,
                ..existing.clone()
            },
            None => Payout {
                id: Uuid::new_v4(),
                group_id,
                cycle_number: cycle,
                recipient_user_id,
                amount,
                status: PayoutStatus::Completed,
                created_at: Utc::now(),
            },
        };

        state.payouts.insert((group_id, cycle), payout.clone());
        Ok(payout)
    }
}

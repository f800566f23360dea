use std::collections::HashMap;
use std::sync::Arc;

use ajo_core::{
    DomainEvent, DomainEventKind, EventStore, GroupConfig, GroupStatus, Member, Payout,
    ReliabilitySnapshot, Result, RiskPolicy, RiskTier, RotationError, RotationStore,
    StandardRiskPolicy,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::gate::{self, CycleSummary, PayoutDecision};
use crate::planner::{OrderState, PayoutPlan, rank_members};
use crate::reliability;
use crate::schedule;
use crate::status::{self, ContributionReport};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderEntry {
    pub member_id: Uuid,
    pub user_id: Uuid,
    pub position: Option<u32>,
    pub reliability: ReliabilitySnapshot,
    pub risk: RiskTier,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderProposal {
    pub group_id: Uuid,
    pub state: OrderState,
    pub entries: Vec<OrderEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub group_id: Uuid,
    pub total_cycles: u32,
    pub obligations_created: usize,
    pub first_due: NaiveDate,
    pub last_due: NaiveDate,
}

/// Drives a group through ordering, schedule generation and payouts against a store.
///
/// Each call is one request-sized state transition. Guards that matter under concurrency
/// (finalize, activation, payout) are enforced by the store's conditional writes; the
/// checks made here only produce better error messages for the common case.
pub struct RotationService<S, E> {
    store: Arc<S>,
    events: Arc<E>,
    risk_policy: Arc<dyn RiskPolicy>,
}

impl<S, E> Clone for RotationService<S, E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            events: Arc::clone(&self.events),
            risk_policy: Arc::clone(&self.risk_policy),
        }
    }
}

impl<S, E> RotationService<S, E>
where
    S: RotationStore,
    E: EventStore,
{
    pub fn new(store: Arc<S>, events: Arc<E>) -> Self {
        Self {
            store,
            events,
            risk_policy: Arc::new(StandardRiskPolicy::default()),
        }
    }

    pub fn with_risk_policy(mut self, risk_policy: impl RiskPolicy + 'static) -> Self {
        self.risk_policy = Arc::new(risk_policy);
        self
    }

    /// Current order, or a reliability ranking when nothing has been drafted yet.
    /// Writes nothing.
    pub async fn preview_order(&self, group_id: Uuid) -> Result<OrderProposal> {
        let group = self.store.fetch_group(group_id).await?;
        let members = self.store.fetch_members(group_id).await?;
        let snapshots = self.reliability(group_id, &members).await?;

        let plan = PayoutPlan::from_roster(&group, members.clone());
        if plan.state() != OrderState::Unordered {
            return Ok(self.proposal(&plan, plan.state(), &snapshots));
        }

        let mut suggestion = plan;
        if !members.is_empty() {
            suggestion.draft(rank_members(members, &snapshots))?;
        }
        Ok(self.proposal(&suggestion, OrderState::Unordered, &snapshots))
    }

    /// Ranks members by reliability and stores the ranking as the draft order.
    pub async fn draft_order(&self, group_id: Uuid, actor_id: Uuid) -> Result<OrderProposal> {
        let group = self.store.fetch_group(group_id).await?;
        ensure_creator(&group, actor_id, "draft the payout order")?;

        let members = self.store.fetch_members(group_id).await?;
        if members.is_empty() {
            return Err(RotationError::Validation("group has no members".to_string()));
        }
        let snapshots = self.reliability(group_id, &members).await?;

        let mut plan = PayoutPlan::from_roster(&group, members.clone());
        plan.draft(rank_members(members, &snapshots))?;
        self.store
            .persist_payout_positions(group_id, &plan.positions())
            .await?;

        info!(
            group_id = %group_id,
            members = plan.members().len(),
            risk_policy = self.risk_policy.name(),
            "payout order drafted"
        );
        self.record(
            group_id,
            DomainEventKind::PayoutOrderDrafted,
            json!({ "positions": plan.positions() }),
        )
        .await;

        Ok(self.proposal(&plan, plan.state(), &snapshots))
    }

    /// Replaces the draft order with `member_ids`, in payout order.
    pub async fn reorder(
        &self,
        group_id: Uuid,
        actor_id: Uuid,
        member_ids: &[Uuid],
    ) -> Result<OrderProposal> {
        let group = self.store.fetch_group(group_id).await?;
        ensure_creator(&group, actor_id, "reorder payouts")?;

        let members = self.store.fetch_members(group_id).await?;
        let snapshots = self.reliability(group_id, &members).await?;
        let mut plan = PayoutPlan::from_roster(&group, members);
        plan.reorder(member_ids)?;
        self.store
            .persist_payout_positions(group_id, &plan.positions())
            .await?;

        info!(group_id = %group_id, "payout order updated");
        self.record(
            group_id,
            DomainEventKind::PayoutOrderReordered,
            json!({ "positions": plan.positions() }),
        )
        .await;

        Ok(self.proposal(&plan, plan.state(), &snapshots))
    }

    /// Locks the payout order. Only one concurrent caller can succeed.
    pub async fn finalize_order(&self, group_id: Uuid, actor_id: Uuid) -> Result<OrderProposal> {
        let group = self.store.fetch_group(group_id).await?;
        ensure_creator(&group, actor_id, "finalize the payout order")?;
        if group.payout_order_finalized {
            return Err(RotationError::Conflict(
                "payout order already finalized".to_string(),
            ));
        }

        let members = self.store.fetch_members(group_id).await?;
        let snapshots = self.reliability(group_id, &members).await?;
        let mut plan = PayoutPlan::from_roster(&group, members);
        plan.finalize(group.max_participants)?;

        if let Err(err) = self.store.set_order_finalized(group_id).await {
            if matches!(err, RotationError::Conflict(_)) {
                warn!(group_id = %group_id, "finalize lost a concurrent race");
            }
            return Err(err);
        }

        info!(group_id = %group_id, "payout order finalized");
        self.record(
            group_id,
            DomainEventKind::PayoutOrderFinalized,
            json!({ "positions": plan.positions() }),
        )
        .await;

        Ok(self.proposal(&plan, plan.state(), &snapshots))
    }

    /// Creates every pending obligation and activates the group, exactly once.
    pub async fn generate_schedule(&self, group_id: Uuid, actor_id: Uuid) -> Result<ScheduleSummary> {
        let group = self.store.fetch_group(group_id).await?;
        ensure_creator(&group, actor_id, "start contributions")?;

        match group.status {
            GroupStatus::Recruiting => {}
            GroupStatus::Active => {
                return Err(RotationError::Conflict(
                    "schedule already generated".to_string(),
                ));
            }
            other => {
                return Err(RotationError::PreconditionFailed(format!(
                    "group is {}",
                    other.as_str()
                )));
            }
        }
        if !group.payout_order_finalized {
            return Err(RotationError::PreconditionFailed(
                "payout order must be finalized first".to_string(),
            ));
        }

        let members = self.store.fetch_members(group_id).await?;
        let plan = PayoutPlan::from_roster(&group, members);
        let obligations = schedule::generate_for_group(&group, &plan)?;

        if let Err(err) = self
            .store
            .activate_with_obligations(group_id, &obligations)
            .await
        {
            if matches!(err, RotationError::Conflict(_)) {
                warn!(group_id = %group_id, "schedule generation lost a concurrent race");
            }
            return Err(err);
        }

        let total_cycles = group.frequency.total_cycles(plan.members().len());
        let first_due = group.start_date;
        let last_due = obligations
            .iter()
            .map(|obligation| obligation.due_date)
            .max()
            .unwrap_or(first_due);

        info!(
            group_id = %group_id,
            total_cycles,
            obligations = obligations.len(),
            frequency = group.frequency.as_str(),
            "contribution schedule generated"
        );
        self.record(
            group_id,
            DomainEventKind::ScheduleGenerated,
            json!({
                "total_cycles": total_cycles,
                "obligations": obligations.len(),
                "first_due": first_due,
                "last_due": last_due,
            }),
        )
        .await;

        Ok(ScheduleSummary {
            group_id,
            total_cycles,
            obligations_created: obligations.len(),
            first_due,
            last_due,
        })
    }

    pub async fn cycle_readiness(&self, group_id: Uuid, cycle: u32) -> Result<PayoutDecision> {
        let group = self.store.fetch_group(group_id).await?;
        let members = self.store.fetch_members(group_id).await?;
        check_cycle(&group, &members, cycle)?;

        let obligations = self.store.fetch_obligations(group_id, Some(cycle)).await?;
        let payouts = self.store.fetch_payouts(group_id).await?;
        let existing = payouts.iter().find(|payout| payout.cycle_number == cycle);

        Ok(gate::can_payout(cycle, &obligations, existing))
    }

    /// Pays the cycle's pot to the member holding that payout position.
    pub async fn release_payout(&self, group_id: Uuid, actor_id: Uuid, cycle: u32) -> Result<Payout> {
        let group = self.store.fetch_group(group_id).await?;
        ensure_creator(&group, actor_id, "release payouts")?;

        let members = self.store.fetch_members(group_id).await?;
        let total_cycles = check_cycle(&group, &members, cycle)?;
        let payouts = self.store.fetch_payouts(group_id).await?;
        let existing = payouts.iter().find(|payout| payout.cycle_number == cycle);

        // A repeat on a paid cycle stays a conflict after the last cycle completes the group.
        if existing.is_some_and(Payout::is_completed) {
            return Err(RotationError::Conflict("already paid".to_string()));
        }
        if group.status != GroupStatus::Active {
            return Err(RotationError::PreconditionFailed(format!(
                "group is {}, payouts need an active group",
                group.status.as_str()
            )));
        }

        let plan = PayoutPlan::from_roster(&group, members);
        let obligations = self.store.fetch_obligations(group_id, Some(cycle)).await?;
        let authorization = gate::authorize_release(cycle, &obligations, existing, &plan)?;

        let payout = match self
            .store
            .insert_payout(
                group_id,
                cycle,
                authorization.recipient_user_id,
                authorization.amount,
            )
            .await
        {
            Ok(payout) => payout,
            Err(RotationError::Conflict(_)) => {
                warn!(group_id = %group_id, cycle, "payout lost a concurrent race");
                return Err(RotationError::Conflict("already paid".to_string()));
            }
            Err(err) => return Err(err),
        };

        info!(
            group_id = %group_id,
            cycle,
            recipient = %payout.recipient_user_id,
            amount = %payout.amount,
            "payout released"
        );
        self.record(
            group_id,
            DomainEventKind::PayoutReleased,
            json!({
                "cycle": cycle,
                "recipient_user_id": payout.recipient_user_id,
                "amount": payout.amount,
            }),
        )
        .await;

        self.complete_if_exhausted(group_id, total_cycles).await;
        Ok(payout)
    }

    pub async fn cycle_summaries(&self, group_id: Uuid) -> Result<Vec<CycleSummary>> {
        let group = self.store.fetch_group(group_id).await?;
        let members = self.store.fetch_members(group_id).await?;
        let obligations = self.store.fetch_obligations(group_id, None).await?;
        let payouts = self.store.fetch_payouts(group_id).await?;

        let total_cycles = group.frequency.total_cycles(members.len());
        Ok(gate::summarize_cycles(
            total_cycles,
            &members,
            &obligations,
            &payouts,
        ))
    }

    pub async fn contribution_report(
        &self,
        group_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ContributionReport> {
        let obligations = self.store.fetch_obligations(group_id, None).await?;
        Ok(status::report(obligations, now))
    }

    /// Runs after a committed payout, so failures are logged rather than returned.
    async fn complete_if_exhausted(&self, group_id: Uuid, total_cycles: u32) {
        let payouts = match self.store.fetch_payouts(group_id).await {
            Ok(payouts) => payouts,
            Err(err) => {
                warn!(group_id = %group_id, "could not check rotation completion: {err}");
                return;
            }
        };
        let all_paid = (1..=total_cycles).all(|cycle| {
            payouts
                .iter()
                .any(|payout| payout.cycle_number == cycle && payout.is_completed())
        });
        if !all_paid {
            return;
        }

        match self
            .store
            .transition_status(group_id, GroupStatus::Active, GroupStatus::Completed)
            .await
        {
            Ok(()) => info!(group_id = %group_id, "rotation completed"),
            Err(RotationError::Conflict(_)) => {
                debug!(group_id = %group_id, "group already completed");
            }
            Err(err) => {
                warn!(group_id = %group_id, "failed to mark rotation completed: {err}");
            }
        }
    }

    async fn reliability(
        &self,
        group_id: Uuid,
        members: &[Member],
    ) -> Result<HashMap<Uuid, ReliabilitySnapshot>> {
        let user_ids: Vec<Uuid> = members.iter().map(|member| member.user_id).collect();
        let history = self
            .store
            .fetch_historical_obligations(&user_ids, group_id)
            .await?;
        Ok(reliability::score_all(&user_ids, &history))
    }

    fn proposal(
        &self,
        plan: &PayoutPlan,
        state: OrderState,
        snapshots: &HashMap<Uuid, ReliabilitySnapshot>,
    ) -> OrderProposal {
        let entries = plan
            .members()
            .iter()
            .map(|member| {
                let reliability = snapshots
                    .get(&member.user_id)
                    .copied()
                    .unwrap_or_else(|| ReliabilitySnapshot::no_history(member.user_id));
                OrderEntry {
                    member_id: member.id,
                    user_id: member.user_id,
                    position: member.payout_position,
                    risk: self.risk_policy.classify(&reliability),
                    reliability,
                }
            })
            .collect();

        OrderProposal {
            group_id: plan.group_id(),
            state,
            entries,
        }
    }

    async fn record(&self, group_id: Uuid, kind: DomainEventKind, payload: serde_json::Value) {
        let event = DomainEvent::new(group_id, kind, payload);
        if let Err(err) = self.events.append(group_id, event).await {
            warn!(group_id = %group_id, ?kind, "failed to record domain event: {err}");
        }
    }
}

fn ensure_creator(group: &GroupConfig, actor_id: Uuid, action: &str) -> Result<()> {
    if group.is_creator(actor_id) {
        Ok(())
    } else {
        Err(RotationError::PermissionDenied(format!(
            "only the group creator may {action}"
        )))
    }
}

fn check_cycle(group: &GroupConfig, members: &[Member], cycle: u32) -> Result<u32> {
    let total_cycles = group.frequency.total_cycles(members.len());
    if cycle == 0 || cycle > total_cycles {
        return Err(RotationError::Validation(format!(
            "cycle {cycle} is outside 1..={total_cycles}"
        )));
    }
    Ok(total_cycles)
}

//! Payout release gating.
//!
//! A cycle pays out at most once, and only after every obligation in it has been
//! collected. Readiness is recomputed from ledger rows on every call.

use std::fmt;

use ajo_core::{ContributionObligation, Member, Payout, Result, RotationError};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::planner::PayoutPlan;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum PayoutReason {
    Ready,
    AlreadyPaid,
    Pending { pending: usize, total: usize },
    NoObligations,
}

impl fmt::Display for PayoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutReason::Ready => write!(f, "ready for payout"),
            PayoutReason::AlreadyPaid => write!(f, "already paid"),
            PayoutReason::Pending { pending, total } => write!(f, "{pending} of {total} pending"),
            PayoutReason::NoObligations => write!(f, "no obligations for cycle"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayoutDecision {
    pub cycle: u32,
    pub authorized: bool,
    pub reason: PayoutReason,
    /// Sum collected for the cycle so far.
    pub collected: Decimal,
}

/// Decides whether `cycle` may pay out. Rows for other cycles are ignored.
pub fn can_payout(
    cycle: u32,
    obligations: &[ContributionObligation],
    existing_payout: Option<&Payout>,
) -> PayoutDecision {
    let in_cycle: Vec<&ContributionObligation> = obligations
        .iter()
        .filter(|obligation| obligation.cycle_number == cycle)
        .collect();
    let collected: Decimal = in_cycle
        .iter()
        .filter(|obligation| obligation.is_collected())
        .map(|obligation| obligation.amount)
        .sum();

    let reason = if existing_payout.is_some_and(Payout::is_completed) {
        PayoutReason::AlreadyPaid
    } else if in_cycle.is_empty() {
        PayoutReason::NoObligations
    } else {
        let pending = in_cycle
            .iter()
            .filter(|obligation| !obligation.is_collected())
            .count();
        if pending == 0 {
            PayoutReason::Ready
        } else {
            PayoutReason::Pending {
                pending,
                total: in_cycle.len(),
            }
        }
    };

    PayoutDecision {
        cycle,
        authorized: reason == PayoutReason::Ready,
        reason,
        collected,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PayoutAuthorization {
    pub cycle: u32,
    pub recipient_user_id: Uuid,
    pub amount: Decimal,
}

/// Turns a readiness decision into the payout to execute, or the error explaining why not.
pub fn authorize_release(
    cycle: u32,
    obligations: &[ContributionObligation],
    existing_payout: Option<&Payout>,
    plan: &PayoutPlan,
) -> Result<PayoutAuthorization> {
    let decision = can_payout(cycle, obligations, existing_payout);
    match decision.reason {
        PayoutReason::Ready => {}
        PayoutReason::AlreadyPaid => {
            return Err(RotationError::Conflict(decision.reason.to_string()));
        }
        PayoutReason::Pending { .. } | PayoutReason::NoObligations => {
            return Err(RotationError::PreconditionFailed(format!(
                "cycle {cycle}: {}",
                decision.reason
            )));
        }
    }

    let recipient = plan.recipient_for_cycle(cycle).ok_or_else(|| {
        RotationError::PreconditionFailed(format!("no member holds payout position {cycle}"))
    })?;

    Ok(PayoutAuthorization {
        cycle,
        recipient_user_id: recipient.user_id,
        amount: decision.collected,
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    Ready,
    Partial,
    Waiting,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleSummary {
    pub cycle: u32,
    pub due_date: Option<NaiveDate>,
    pub recipient_user_id: Option<Uuid>,
    pub paid_count: usize,
    pub total_count: usize,
    pub collected: Decimal,
    pub status: CycleStatus,
}

/// One summary per cycle in `1..=total_cycles`.
pub fn summarize_cycles(
    total_cycles: u32,
    members: &[Member],
    obligations: &[ContributionObligation],
    payouts: &[Payout],
) -> Vec<CycleSummary> {
    (1..=total_cycles)
        .map(|cycle| {
            let in_cycle: Vec<&ContributionObligation> = obligations
                .iter()
                .filter(|obligation| obligation.cycle_number == cycle)
                .collect();
            let paid_count = in_cycle.iter().filter(|o| o.is_collected()).count();
            let total_count = in_cycle.len();
            let completed = payouts
                .iter()
                .any(|payout| payout.cycle_number == cycle && payout.is_completed());

            let status = if completed {
                CycleStatus::Completed
            } else if total_count > 0 && paid_count == total_count {
                CycleStatus::Ready
            } else if paid_count > 0 {
                CycleStatus::Partial
            } else {
                CycleStatus::Waiting
            };

            CycleSummary {
                cycle,
                due_date: in_cycle.first().map(|obligation| obligation.due_date),
                recipient_user_id: members
                    .iter()
                    .find(|member| member.payout_position == Some(cycle))
                    .map(|member| member.user_id),
                paid_count,
                total_count,
                collected: in_cycle
                    .iter()
                    .filter(|o| o.is_collected())
                    .map(|o| o.amount)
                    .sum(),
                status,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ajo_core::{Frequency, GroupConfig, GroupStatus, PayoutStatus, SettlementState};
    use chrono::{TimeZone, Utc};

    fn due() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn cycle_rows(group_id: Uuid, cycle: u32, states: &[SettlementState]) -> Vec<ContributionObligation> {
        states
            .iter()
            .map(|state| {
                let mut obligation = ContributionObligation::pending(
                    group_id,
                    Uuid::new_v4(),
                    cycle,
                    Decimal::new(5000, 0),
                    due(),
                );
                obligation.state = *state;
                if state.is_collected() {
                    obligation.paid_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
                }
                obligation
            })
            .collect()
    }

    fn payout(group_id: Uuid, cycle: u32, status: PayoutStatus) -> Payout {
        Payout {
            id: Uuid::new_v4(),
            group_id,
            cycle_number: cycle,
            recipient_user_id: Uuid::new_v4(),
            amount: Decimal::new(15000, 0),
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_any_unpaid_blocks() {
        use SettlementState::*;
        let g = Uuid::new_v4();
        for blocker in [Pending, Missed] {
            let rows = cycle_rows(g, 1, &[Paid, blocker, Paid]);
            let decision = can_payout(1, &rows, None);
            assert!(!decision.authorized);
            assert_eq!(decision.reason, PayoutReason::Pending { pending: 1, total: 3 });
            assert_eq!(decision.reason.to_string(), "1 of 3 pending");
            assert_eq!(decision.collected, Decimal::new(10000, 0));
        }
    }

    #[test]
    fn test_all_collected_authorizes() {
        use SettlementState::*;
        let g = Uuid::new_v4();
        let rows = cycle_rows(g, 2, &[Paid, Late, Paid]);
        let decision = can_payout(2, &rows, None);
        assert!(decision.authorized);
        assert_eq!(decision.collected, Decimal::new(15000, 0));

        let pending = payout(g, 2, PayoutStatus::Pending);
        assert!(can_payout(2, &rows, Some(&pending)).authorized);
    }

    #[test]
    fn test_completed_payout_blocks() {
        let g = Uuid::new_v4();
        let rows = cycle_rows(g, 1, &[SettlementState::Paid; 3]);
        let done = payout(g, 1, PayoutStatus::Completed);
        let decision = can_payout(1, &rows, Some(&done));
        assert!(!decision.authorized);
        assert_eq!(decision.reason.to_string(), "already paid");
    }

    #[test]
    fn test_empty_cycle_is_not_ready() {
        let g = Uuid::new_v4();
        let rows = cycle_rows(g, 1, &[SettlementState::Paid; 2]);
        let decision = can_payout(3, &rows, None);
        assert!(!decision.authorized);
        assert_eq!(decision.reason, PayoutReason::NoObligations);
    }

    fn plan_for(n: u32) -> (PayoutPlan, Vec<Member>) {
        let group = GroupConfig {
            id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            name: "Susu".to_string(),
            contribution_amount: Decimal::new(5000, 0),
            frequency: Frequency::Weekly,
            max_participants: n,
            start_date: due(),
            end_date: None,
            payout_order_finalized: true,
            status: GroupStatus::Active,
            created_at: Utc::now(),
        };
        let members: Vec<Member> = (1..=n)
            .map(|position| Member {
                id: Uuid::new_v4(),
                group_id: group.id,
                user_id: Uuid::new_v4(),
                joined_at: Utc::now(),
                payout_position: Some(position),
            })
            .collect();
        (PayoutPlan::from_roster(&group, members.clone()), members)
    }

    #[test]
    fn test_authorize_release_maps_reasons() {
        use SettlementState::*;
        let (plan, members) = plan_for(3);
        let g = plan.group_id();

        let partial = cycle_rows(g, 2, &[Paid, Pending, Pending]);
        assert!(matches!(
            authorize_release(2, &partial, None, &plan),
            Err(RotationError::PreconditionFailed(_))
        ));

        let ready = cycle_rows(g, 2, &[Paid, Paid, Late]);
        let authorization = authorize_release(2, &ready, None, &plan).unwrap();
        assert_eq!(authorization.recipient_user_id, members[1].user_id);
        assert_eq!(authorization.amount, Decimal::new(15000, 0));

        let done = payout(g, 2, PayoutStatus::Completed);
        assert_eq!(
            authorize_release(2, &ready, Some(&done), &plan),
            Err(RotationError::Conflict("already paid".to_string()))
        );
    }

    #[test]
    fn test_cycle_summaries() {
        use SettlementState::*;
        let (plan, members) = plan_for(3);
        let g = plan.group_id();
        let mut rows = cycle_rows(g, 1, &[Paid, Paid, Paid]);
        rows.extend(cycle_rows(g, 2, &[Paid, Pending, Pending]));
        rows.extend(cycle_rows(g, 3, &[Pending, Pending, Pending]));
        let payouts = vec![payout(g, 1, PayoutStatus::Completed)];

        let summaries = summarize_cycles(3, &members, &rows, &payouts);
        let statuses: Vec<CycleStatus> = summaries.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![CycleStatus::Completed, CycleStatus::Partial, CycleStatus::Waiting]
        );
        assert_eq!(summaries[1].paid_count, 1);
        assert_eq!(summaries[2].recipient_user_id, Some(members[2].user_id));
        assert_eq!(summaries[0].collected, Decimal::new(15000, 0));
    }
}

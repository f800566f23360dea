//! Contribution schedule generation.
//!
//! A finalized order of N members expands into N obligations per cycle, one cycle per
//! member (a single cycle for lump-sum groups), due on consecutive frequency steps.

use ajo_core::{ContributionObligation, Frequency, GroupConfig, Result, RotationError};
use chrono::{Days, Months, NaiveDate};
use rust_decimal::Decimal;

use crate::planner::PayoutPlan;

/// Due date of `cycle` (1-based): the start date advanced by `cycle - 1` frequency steps.
pub fn due_date_for_cycle(frequency: Frequency, start_date: NaiveDate, cycle: u32) -> Result<NaiveDate> {
    if cycle == 0 {
        return Err(RotationError::Validation("cycles are numbered from 1".to_string()));
    }
    let steps = cycle - 1;

    let due = match frequency {
        Frequency::Daily => start_date.checked_add_days(Days::new(u64::from(steps))),
        Frequency::Weekly => start_date.checked_add_days(Days::new(7 * u64::from(steps))),
        // Clamps to the last day of shorter months.
        Frequency::Monthly => start_date.checked_add_months(Months::new(steps)),
        Frequency::OneTime if steps == 0 => Some(start_date),
        Frequency::OneTime => {
            return Err(RotationError::Validation(
                "lump-sum groups have a single cycle".to_string(),
            ));
        }
    };

    due.ok_or_else(|| RotationError::Validation(format!("due date for cycle {cycle} overflows")))
}

/// Expands a finalized payout order into pending obligations: every member owes
/// `contribution_amount` in every cycle.
pub fn generate(
    plan: &PayoutPlan,
    contribution_amount: Decimal,
    frequency: Frequency,
    start_date: NaiveDate,
) -> Result<Vec<ContributionObligation>> {
    if !plan.is_finalized() {
        return Err(RotationError::PreconditionFailed(
            "payout order must be finalized before generating the schedule".to_string(),
        ));
    }
    let members = plan.members();
    if members.is_empty() {
        return Err(RotationError::Validation("member list is empty".to_string()));
    }
    if contribution_amount <= Decimal::ZERO {
        return Err(RotationError::Validation(
            "contribution_amount must be positive".to_string(),
        ));
    }

    let total_cycles = frequency.total_cycles(members.len());
    let mut obligations = Vec::with_capacity(members.len() * total_cycles as usize);

    for cycle in 1..=total_cycles {
        let due_date = due_date_for_cycle(frequency, start_date, cycle)?;
        obligations.extend(members.iter().map(|member| {
            ContributionObligation::pending(
                plan.group_id(),
                member.user_id,
                cycle,
                contribution_amount,
                due_date,
            )
        }));
    }

    Ok(obligations)
}

/// Generates with the group's own settings, also checking that the last cycle
/// falls within the group's end date.
pub fn generate_for_group(group: &GroupConfig, plan: &PayoutPlan) -> Result<Vec<ContributionObligation>> {
    if plan.group_id() != group.id {
        return Err(RotationError::Validation(
            "payout plan belongs to a different group".to_string(),
        ));
    }

    let obligations = generate(plan, group.contribution_amount, group.frequency, group.start_date)?;

    if let Some(end_date) = group.end_date {
        let last_due = obligations.iter().map(|obligation| obligation.due_date).max();
        if let Some(last_due) = last_due.filter(|last_due| *last_due > end_date) {
            return Err(RotationError::Validation(format!(
                "last cycle is due {last_due}, after the group end date {end_date}"
            )));
        }
    }

    Ok(obligations)
}

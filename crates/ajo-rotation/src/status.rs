//! Read-time classification of contributions.
//!
//! Nothing marks an obligation overdue in the background; lateness is recomputed
//! from the stored row and the instant of the query.

use ajo_core::{ContributionObligation, SettlementState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContributionStatus {
    Pending,
    Overdue { days: i64 },
    PaidOnTime,
    PaidLate,
    Missed,
}

pub fn classify(obligation: &ContributionObligation, now: DateTime<Utc>) -> ContributionStatus {
    match obligation.state {
        SettlementState::Missed => ContributionStatus::Missed,
        SettlementState::Paid | SettlementState::Late => {
            if obligation.paid_late() {
                ContributionStatus::PaidLate
            } else {
                ContributionStatus::PaidOnTime
            }
        }
        SettlementState::Pending => {
            let today = now.date_naive();
            if today > obligation.due_date {
                ContributionStatus::Overdue {
                    days: (today - obligation.due_date).num_days(),
                }
            } else {
                ContributionStatus::Pending
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContributionTally {
    pub paid_on_time: usize,
    pub paid_late: usize,
    pub overdue: usize,
    pub pending: usize,
    pub missed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContributionView {
    pub obligation: ContributionObligation,
    pub status: ContributionStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContributionReport {
    pub tally: ContributionTally,
    pub items: Vec<ContributionView>,
}

pub fn report(obligations: Vec<ContributionObligation>, now: DateTime<Utc>) -> ContributionReport {
    let mut tally = ContributionTally::default();
    let items = obligations
        .into_iter()
        .map(|obligation| {
            let status = classify(&obligation, now);
            match status {
                ContributionStatus::Pending => tally.pending += 1,
                ContributionStatus::Overdue { .. } => tally.overdue += 1,
                ContributionStatus::PaidOnTime => tally.paid_on_time += 1,
                ContributionStatus::PaidLate => tally.paid_late += 1,
                ContributionStatus::Missed => tally.missed += 1,
            }
            ContributionView { obligation, status }
        })
        .collect();

    ContributionReport { tally, items }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn obligation(state: SettlementState, paid_at: Option<DateTime<Utc>>) -> ContributionObligation {
        ContributionObligation {
            state,
            paid_at,
            ..ContributionObligation::pending(
                Uuid::new_v4(),
                Uuid::new_v4(),
                1,
                Decimal::new(5000, 0),
                NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
            )
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_pending_turns_overdue_after_due_day() {
        let row = obligation(SettlementState::Pending, None);
        assert_eq!(classify(&row, at(8, 23)), ContributionStatus::Pending);
        assert_eq!(classify(&row, at(11, 1)), ContributionStatus::Overdue { days: 3 });
    }

    #[test]
    fn test_stored_late_matches_derived_late() {
        let derived = obligation(SettlementState::Paid, Some(at(10, 12)));
        let stored = obligation(SettlementState::Late, Some(at(10, 12)));
        assert_eq!(classify(&derived, at(20, 0)), ContributionStatus::PaidLate);
        assert_eq!(classify(&derived, at(20, 0)), classify(&stored, at(20, 0)));

        let on_time = obligation(SettlementState::Paid, Some(at(8, 12)));
        assert_eq!(classify(&on_time, at(20, 0)), ContributionStatus::PaidOnTime);
    }

    #[test]
    fn test_report_tallies() {
        let rows = vec![
            obligation(SettlementState::Pending, None),
            obligation(SettlementState::Paid, Some(at(7, 9))),
            obligation(SettlementState::Paid, Some(at(9, 9))),
            obligation(SettlementState::Late, Some(at(12, 9))),
            obligation(SettlementState::Missed, None),
        ];
        let report = report(rows, at(15, 0));
        assert_eq!(
            report.tally,
            ContributionTally {
                paid_on_time: 1,
                paid_late: 2,
                overdue: 1,
                pending: 0,
                missed: 1,
            }
        );
        assert_eq!(report.items.len(), 5);
    }
}

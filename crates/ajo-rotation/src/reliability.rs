//! Payment reliability scoring.
//!
//! A member's reliability is derived from obligations they held in *other* groups:
//! how many were collected, and how many of those were collected after their due date.
//! A member with no collected obligations has no history, which is distinct from a
//! member whose late rate happens to be zero.

use std::collections::{HashMap, HashSet};

use ajo_core::{PaymentRecord, ReliabilitySnapshot};
use uuid::Uuid;

/// Scores one member from a history that may contain other members' records.
pub fn score(user_id: Uuid, history: &[PaymentRecord]) -> ReliabilitySnapshot {
    let own = history.iter().filter(|record| record.user_id == user_id);
    score_records(user_id, own)
}

/// Scores every listed member in a single pass over the history.
pub fn score_all(user_ids: &[Uuid], history: &[PaymentRecord]) -> HashMap<Uuid, ReliabilitySnapshot> {
    let mut by_user: HashMap<Uuid, Vec<&PaymentRecord>> = HashMap::new();
    for record in history {
        by_user.entry(record.user_id).or_default().push(record);
    }

    user_ids
        .iter()
        .map(|user_id| {
            let records = by_user.get(user_id).map(Vec::as_slice).unwrap_or_default();
            (*user_id, score_records(*user_id, records.iter().copied()))
        })
        .collect()
}

fn score_records<'a>(
    user_id: Uuid,
    records: impl Iterator<Item = &'a PaymentRecord>,
) -> ReliabilitySnapshot {
    let mut total_payments = 0u32;
    let mut late_payments = 0u32;
    let mut groups = HashSet::new();

    for record in records {
        groups.insert(record.group_id);
        if !record.state.is_collected() {
            continue;
        }
        total_payments += 1;
        if record.was_paid_late() {
            late_payments += 1;
        }
    }

    let late_rate = if total_payments == 0 {
        0.0
    } else {
        f64::from(late_payments) / f64::from(total_payments) * 100.0
    };

    ReliabilitySnapshot {
        user_id,
        late_rate,
        total_payments,
        late_payments,
        distinct_groups: groups.len() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ajo_core::SettlementState;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn record(user_id: Uuid, group_id: Uuid, state: SettlementState, paid_day: Option<u32>) -> PaymentRecord {
        PaymentRecord {
            user_id,
            group_id,
            state,
            due_date: NaiveDate::from_ymd_opt(2023, 5, 10).unwrap(),
            paid_at: paid_day.map(|day| Utc.with_ymd_and_hms(2023, 5, day, 10, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_no_history_is_sentinel() {
        let user = Uuid::new_v4();
        let snapshot = score(user, &[]);
        assert_eq!(snapshot.total_payments, 0);
        assert_eq!(snapshot.late_rate, 0.0);
        assert!(!snapshot.has_history());
    }

    #[test]
    fn test_unpaid_records_do_not_create_history() {
        let user = Uuid::new_v4();
        let history = vec![
            record(user, Uuid::new_v4(), SettlementState::Pending, None),
            record(user, Uuid::new_v4(), SettlementState::Missed, None),
        ];
        let snapshot = score(user, &history);
        assert_eq!(snapshot.total_payments, 0);
        assert_eq!(snapshot.distinct_groups, 2);
        assert!(!snapshot.has_history());
    }

    #[test]
    fn test_late_rate_over_collected_payments() {
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();
        let history = vec![
            record(user, group, SettlementState::Paid, Some(9)),
            record(user, group, SettlementState::Paid, Some(10)),
            record(user, group, SettlementState::Paid, Some(12)),
            record(user, Uuid::new_v4(), SettlementState::Late, Some(15)),
            record(user, group, SettlementState::Missed, None),
        ];

        let snapshot = score(user, &history);
        assert_eq!(snapshot.total_payments, 4);
        assert_eq!(snapshot.late_payments, 2);
        assert_eq!(snapshot.late_rate, 50.0);
        assert_eq!(snapshot.distinct_groups, 2);
    }

    #[test]
    fn test_paid_without_timestamp_is_not_late() {
        let user = Uuid::new_v4();
        let history = vec![record(user, Uuid::new_v4(), SettlementState::Paid, None)];
        let snapshot = score(user, &history);
        assert_eq!(snapshot.total_payments, 1);
        assert_eq!(snapshot.late_payments, 0);
    }

    #[test]
    fn test_score_all_ignores_other_members() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let history = vec![
            record(a, Uuid::new_v4(), SettlementState::Paid, Some(20)),
            record(b, Uuid::new_v4(), SettlementState::Paid, Some(1)),
        ];

        let scores = score_all(&[a, b, c], &history);
        assert_eq!(scores[&a].late_rate, 100.0);
        assert_eq!(scores[&b].late_rate, 0.0);
        assert!(scores[&b].has_history());
        assert!(!scores[&c].has_history());
        assert_eq!(scores[&a], score(a, &history));
    }
}

use serde::{Deserialize, Serialize};

use crate::models::ReliabilitySnapshot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    NewMember,
    Low,
    Medium,
    High,
}

/// Maps a member's reliability to the tier shown next to their payout position.
pub trait RiskPolicy: Send + Sync {
    fn name(&self) -> &'static str;
    fn classify(&self, snapshot: &ReliabilitySnapshot) -> RiskTier;
}

/// Late-rate thresholds, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardRiskPolicy {
    pub high_pct: f64,
    pub medium_pct: f64,
}

impl Default for StandardRiskPolicy {
    fn default() -> Self {
        Self {
            high_pct: 50.0,
            medium_pct: 20.0,
        }
    }
}

impl RiskPolicy for StandardRiskPolicy {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn classify(&self, snapshot: &ReliabilitySnapshot) -> RiskTier {
        if !snapshot.has_history() {
            return RiskTier::NewMember;
        }

        if snapshot.late_rate >= self.high_pct {
            RiskTier::High
        } else if snapshot.late_rate >= self.medium_pct {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn snapshot(late_rate: f64, total_payments: u32) -> ReliabilitySnapshot {
        ReliabilitySnapshot {
            user_id: Uuid::new_v4(),
            late_rate,
            total_payments,
            late_payments: 0,
            distinct_groups: 1,
        }
    }

    #[test]
    fn test_standard_tiers() {
        let policy = StandardRiskPolicy::default();
        assert_eq!(policy.classify(&snapshot(0.0, 0)), RiskTier::NewMember);
        assert_eq!(policy.classify(&snapshot(0.0, 4)), RiskTier::Low);
        assert_eq!(policy.classify(&snapshot(19.9, 4)), RiskTier::Low);
        assert_eq!(policy.classify(&snapshot(20.0, 4)), RiskTier::Medium);
        assert_eq!(policy.classify(&snapshot(50.0, 4)), RiskTier::High);
    }
}

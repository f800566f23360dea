//! Payout order planning.
//!
//! A group's payout order moves through `Unordered -> DraftOrdered -> Finalized`.
//! Drafting ranks members by reliability; the creator may then replace the order with
//! any permutation until finalization, which is terminal.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use ajo_core::{GroupConfig, Member, PayoutPosition, ReliabilitySnapshot, Result, RotationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Unordered,
    DraftOrdered,
    Finalized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedMember {
    pub member: Member,
    pub reliability: ReliabilitySnapshot,
}

/// Members with history come first by ascending late rate; members without history
/// follow, keeping their relative order.
pub fn compare_reliability(a: &ReliabilitySnapshot, b: &ReliabilitySnapshot) -> Ordering {
    match (a.has_history(), b.has_history()) {
        (false, false) => Ordering::Equal,
        (false, true) => Ordering::Greater,
        (true, false) => Ordering::Less,
        (true, true) => a.late_rate.total_cmp(&b.late_rate),
    }
}

/// Stable ranking of `members` (given in join order) by their reliability.
pub fn rank_members(
    members: Vec<Member>,
    snapshots: &HashMap<Uuid, ReliabilitySnapshot>,
) -> Vec<RankedMember> {
    let mut ranked: Vec<RankedMember> = members
        .into_iter()
        .map(|member| {
            let reliability = snapshots
                .get(&member.user_id)
                .copied()
                .unwrap_or_else(|| ReliabilitySnapshot::no_history(member.user_id));
            RankedMember {
                member,
                reliability,
            }
        })
        .collect();

    ranked.sort_by(|a, b| compare_reliability(&a.reliability, &b.reliability));
    ranked
}

/// In-memory payout order for one group.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutPlan {
    group_id: Uuid,
    state: OrderState,
    members: Vec<Member>,
}

impl PayoutPlan {
    /// Rebuilds the plan from stored members (join order) and the group's finalized flag.
    pub fn from_roster(group: &GroupConfig, members: Vec<Member>) -> Self {
        let positioned = !members.is_empty()
            && members.iter().all(|member| member.payout_position.is_some());

        let state = if group.payout_order_finalized {
            OrderState::Finalized
        } else if positioned {
            OrderState::DraftOrdered
        } else {
            OrderState::Unordered
        };

        let mut members = members;
        if positioned {
            members.sort_by_key(|member| member.payout_position);
        }

        Self {
            group_id: group.id,
            state,
            members,
        }
    }

    pub fn group_id(&self) -> Uuid {
        self.group_id
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.state == OrderState::Finalized
    }

    /// Members in payout order once drafted, join order before that.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn positions(&self) -> Vec<PayoutPosition> {
        self.members
            .iter()
            .filter_map(|member| {
                member.payout_position.map(|position| PayoutPosition {
                    member_id: member.id,
                    position,
                })
            })
            .collect()
    }

    pub fn recipient_for_cycle(&self, cycle: u32) -> Option<&Member> {
        self.members
            .iter()
            .find(|member| member.payout_position == Some(cycle))
    }

    /// Adopts a reliability ranking as the draft order.
    pub fn draft(&mut self, ranked: Vec<RankedMember>) -> Result<()> {
        let order: Vec<Uuid> = ranked.iter().map(|entry| entry.member.id).collect();
        self.reorder(&order)
    }

    /// Replaces the whole order with a permutation of the current members.
    pub fn reorder(&mut self, member_ids: &[Uuid]) -> Result<()> {
        if self.is_finalized() {
            return Err(RotationError::PermissionDenied(
                "payout order is finalized and cannot be changed".to_string(),
            ));
        }
        self.ensure_permutation(member_ids)?;

        let mut by_id: HashMap<Uuid, Member> = self
            .members
            .drain(..)
            .map(|member| (member.id, member))
            .collect();

        self.members = member_ids
            .iter()
            .enumerate()
            .filter_map(|(index, id)| {
                by_id.remove(id).map(|mut member| {
                    member.payout_position = Some(index as u32 + 1);
                    member
                })
            })
            .collect();
        self.state = OrderState::DraftOrdered;
        Ok(())
    }

    /// Locks the order. The roster must be full and positions exactly `1..=N`.
    pub fn finalize(&mut self, max_participants: u32) -> Result<()> {
        if self.is_finalized() {
            return Err(RotationError::Conflict(
                "payout order already finalized".to_string(),
            ));
        }
        if self.members.is_empty() {
            return Err(RotationError::Validation("group has no members".to_string()));
        }
        if self.members.len() != max_participants as usize {
            return Err(RotationError::Validation(format!(
                "roster has {} of {max_participants} members",
                self.members.len()
            )));
        }
        validate_positions(&self.members)?;

        self.state = OrderState::Finalized;
        Ok(())
    }

    fn ensure_permutation(&self, member_ids: &[Uuid]) -> Result<()> {
        if member_ids.is_empty() {
            return Err(RotationError::Validation("member list is empty".to_string()));
        }
        if member_ids.len() != self.members.len() {
            return Err(RotationError::Validation(format!(
                "expected {} members in the new order, found {}",
                self.members.len(),
                member_ids.len()
            )));
        }

        let current: HashSet<Uuid> = self.members.iter().map(|member| member.id).collect();
        let mut seen = HashSet::with_capacity(member_ids.len());
        for id in member_ids {
            if !current.contains(id) {
                return Err(RotationError::Validation(format!(
                    "member {id} does not belong to this group"
                )));
            }
            if !seen.insert(*id) {
                return Err(RotationError::Validation(format!(
                    "member {id} appears more than once"
                )));
            }
        }
        Ok(())
    }
}

/// Positions must be present and form exactly `{1..=N}`.
pub fn validate_positions(members: &[Member]) -> Result<()> {
    let count = members.len() as u32;
    let mut seen = HashSet::with_capacity(members.len());

    for member in members {
        let Some(position) = member.payout_position else {
            return Err(RotationError::Validation(format!(
                "member {} has no payout position",
                member.id
            )));
        };
        if position == 0 || position > count {
            return Err(RotationError::Validation(format!(
                "payout position {position} is outside 1..={count}"
            )));
        }
        if !seen.insert(position) {
            return Err(RotationError::Validation(format!(
                "payout position {position} is assigned twice"
            )));
        }
    }
    Ok(())
}

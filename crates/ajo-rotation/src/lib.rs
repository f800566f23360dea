//! Payout rotation scheduling for rotating savings groups.
//!
//! The pieces run in order over a group's life:
//! 1. [`reliability`] scores each member's payment history from other groups.
//! 2. [`planner`] ranks members into a payout order, accepts manual reordering, and
//!    locks the order on finalize.
//! 3. [`schedule`] expands the finalized order into per-cycle contribution obligations.
//! 4. [`gate`] decides when a cycle's pot may be released and to whom.
//!
//! [`status`] classifies obligations at read time, and [`service`] sequences all of the
//! above against a [`ajo_core::RotationStore`].

pub mod gate;
pub mod planner;
pub mod reliability;
pub mod schedule;
pub mod service;
pub mod status;

pub use gate::{
    CycleStatus, CycleSummary, PayoutAuthorization, PayoutDecision, PayoutReason,
    authorize_release, can_payout, summarize_cycles,
};
pub use planner::{OrderState, PayoutPlan, RankedMember, compare_reliability, rank_members};
pub use reliability::{score, score_all};
pub use schedule::{due_date_for_cycle, generate, generate_for_group};
pub use service::{OrderEntry, OrderProposal, RotationService, ScheduleSummary};
pub use status::{ContributionReport, ContributionStatus, ContributionTally, classify};

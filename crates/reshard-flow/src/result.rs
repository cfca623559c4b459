//! Terminal records for resharding operations.

use serde::{Deserialize, Serialize};

use reshard_core::{ReshardId, ShardTopology};

use crate::phase::{PhaseHistoryEntry, ReshardPhase};
use crate::plan::ReshardPlan;
use crate::state::{FailureRecord, ReshardState};

/// Everything the rollback engine needs to reverse a partial operation.
///
/// Present on a result only when the operation did not complete — its
/// presence is itself the signal that rollback applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackMetadata {
    /// The plan that was being executed.
    pub original_plan: ReshardPlan,
    /// The topology to restore if cutover already happened.
    pub old_topology: ShardTopology,
    /// The most recent phase to complete before the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_completed_phase: Option<ReshardPhase>,
}

/// The terminal record of a resharding operation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReshardResult {
    /// The operation this result belongs to.
    pub id: ReshardId,
    /// Terminal phase: `Completed`, `Failed`, or `RolledBack`.
    pub final_phase: ReshardPhase,
    /// Completed phases in order, with timing.
    pub phase_history: Vec<PhaseHistoryEntry>,
    /// The failure that terminated the operation, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    /// A non-fatal cleanup failure recorded on an otherwise completed
    /// operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_failure: Option<FailureRecord>,
    /// Rollback inputs; present iff the operation did not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_metadata: Option<RollbackMetadata>,
}

impl ReshardResult {
    /// Builds the terminal result for a state.
    ///
    /// Completed operations carry no rollback metadata; failed (and
    /// rolled-back) operations always do.
    #[must_use]
    pub fn from_state(state: &ReshardState) -> Self {
        let rollback_metadata = (state.current_phase != ReshardPhase::Completed).then(|| {
            RollbackMetadata {
                original_plan: state.plan.clone(),
                old_topology: state.plan.old_topology.clone(),
                last_completed_phase: state.last_completed_phase,
            }
        });

        Self {
            id: state.id,
            final_phase: state.current_phase,
            phase_history: state.phase_history.clone(),
            failure: state.failure.clone(),
            cleanup_failure: state.cleanup_failure.clone(),
            rollback_metadata,
        }
    }

    /// Returns true if the operation completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.final_phase == ReshardPhase::Completed
    }
}

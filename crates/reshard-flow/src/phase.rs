//! The resharding phase state machine vocabulary.
//!
//! Phases advance in strict forward order — no skipping, no re-entry once
//! passed. `Failed` and `RolledBack` are terminal absorbing states reachable
//! from the in-flight phases; a CleaningUp failure is recorded but does not
//! fail the operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resharding phase states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReshardPhase {
    /// Computing migration steps from the topology diff.
    Planning,
    /// Bulk-copying snapshot data to target shards.
    Copying,
    /// Replaying incremental changes until lag drops below threshold.
    Replicating,
    /// Comparing source/target consistency.
    Verifying,
    /// Atomically switching the live topology.
    CuttingOver,
    /// Deleting redundant rows from the old assignment after the retention
    /// window.
    CleaningUp,
    /// All phases completed; the new topology is live.
    Completed,
    /// A phase failed; rollback metadata is attached to the result.
    Failed,
    /// Rollback completed; the old topology's data layout is restored.
    RolledBack,
}

impl ReshardPhase {
    /// The forward phase chain, in execution order.
    pub const ORDER: [Self; 7] = [
        Self::Planning,
        Self::Copying,
        Self::Replicating,
        Self::Verifying,
        Self::CuttingOver,
        Self::CleaningUp,
        Self::Completed,
    ];

    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }

    /// Returns the next phase in the forward chain, or `None` from a
    /// terminal state.
    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        match self {
            Self::Planning => Some(Self::Copying),
            Self::Copying => Some(Self::Replicating),
            Self::Replicating => Some(Self::Verifying),
            Self::Verifying => Some(Self::CuttingOver),
            Self::CuttingOver => Some(Self::CleaningUp),
            Self::CleaningUp => Some(Self::Completed),
            Self::Completed | Self::Failed | Self::RolledBack => None,
        }
    }

    /// Returns true if the transition from self to target is valid.
    ///
    /// Forward-only, one phase at a time. `Failed` is reachable from any
    /// in-flight phase; `RolledBack` only from `Failed`. CleaningUp cannot
    /// fail the operation, so `CleaningUp -> Failed` is not a valid
    /// transition.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        if target == Self::Failed {
            return matches!(
                self,
                Self::Copying | Self::Replicating | Self::Verifying | Self::CuttingOver
            );
        }
        if target == Self::RolledBack {
            return *self == Self::Failed;
        }
        self.next() == Some(target)
    }
}

impl std::fmt::Display for ReshardPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning => write!(f, "PLANNING"),
            Self::Copying => write!(f, "COPYING"),
            Self::Replicating => write!(f, "REPLICATING"),
            Self::Verifying => write!(f, "VERIFYING"),
            Self::CuttingOver => write!(f, "CUTTING_OVER"),
            Self::CleaningUp => write!(f, "CLEANING_UP"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// Record of one completed phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseHistoryEntry {
    /// The phase that completed.
    pub phase: ReshardPhase,
    /// When the phase started.
    pub started_at: DateTime<Utc>,
    /// When the phase completed.
    pub completed_at: DateTime<Utc>,
}

impl PhaseHistoryEntry {
    /// Returns how long the phase ran. Derived, never stored.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }
}

//! Durable state for an in-flight resharding operation.
//!
//! [`ReshardState`] is the single source of truth for one operation. It is
//! owned exclusively by the phase state machine, mutated in place (by
//! identity, never replaced), and persisted after every phase transition and
//! every batch checkpoint — that granularity is what bounds re-work after a
//! crash.
//!
//! Invariant: `last_completed_phase` is always strictly before
//! `current_phase` in the forward chain, or absent if no phase has
//! completed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reshard_core::ReshardId;

use crate::error::{Error, ErrorKind, Result};
use crate::ops::{BatchCursor, CdcPosition};
use crate::phase::{PhaseHistoryEntry, ReshardPhase};
use crate::plan::ReshardPlan;

/// Progress counters for one migration step.
///
/// Counters are monotonically non-decreasing; `is_verified` is a one-way
/// false→true latch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepProgress {
    /// Rows bulk-copied to the target so far.
    pub rows_copied: u64,
    /// Incremental changes replayed to the target so far.
    pub rows_replicated: u64,
    /// True once the step passed consistency verification.
    pub is_verified: bool,
}

/// Resume markers scoped to the currently executing phase.
///
/// Cursors are keyed by full step identity ([`crate::plan::MigrationStep::id`])
/// because per-step operations run in parallel and steps may share a shard
/// pair. The whole checkpoint is cleared when a phase completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReshardCheckpoint {
    /// Last persisted bulk-copy cursor per step.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub copy_cursors: BTreeMap<String, BatchCursor>,
    /// Last persisted change-stream position per step.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cdc_positions: BTreeMap<String, CdcPosition>,
}

impl ReshardCheckpoint {
    /// Returns true if no resume markers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.copy_cursors.is_empty() && self.cdc_positions.is_empty()
    }

    /// Drops all resume markers. Called when a phase completes.
    pub fn clear(&mut self) {
        self.copy_cursors.clear();
        self.cdc_positions.clear();
    }
}

/// One source/target divergence found during verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeMismatch {
    /// Full identity of the mismatched step.
    pub step: String,
    /// Row count observed on the source shard.
    pub source_count: u64,
    /// Row count observed on the target shard.
    pub target_count: u64,
    /// Implementation-specific diagnosis, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Serializable record of a failure, persisted in state and results.
///
/// The rich [`Error`] value does not survive a restart; this record does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    /// Classification of the failure.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Verification mismatch details, retained in full for diagnosis.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mismatches: Vec<RangeMismatch>,
}

impl FailureRecord {
    /// Builds a failure record from an error.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            mismatches: error.mismatches().to_vec(),
        }
    }
}

/// The durable state of one resharding operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReshardState {
    /// Unique operation identifier.
    pub id: ReshardId,
    /// The phase currently executing (or the terminal outcome).
    pub current_phase: ReshardPhase,
    /// The plan being executed.
    pub plan: ReshardPlan,
    /// Per-step progress counters, keyed by full step identity.
    #[serde(default)]
    pub progress: BTreeMap<String, StepProgress>,
    /// The most recent phase to complete, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_completed_phase: Option<ReshardPhase>,
    /// When the operation was admitted.
    pub started_at: DateTime<Utc>,
    /// When the current phase started. Survives crash/resume so phase
    /// history durations reflect wall-clock time including downtime.
    pub phase_started_at: DateTime<Utc>,
    /// When the topology swap completed. Anchors the cleanup retention
    /// window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cutover_at: Option<DateTime<Utc>>,
    /// Resume markers for the current phase.
    #[serde(default)]
    pub checkpoint: ReshardCheckpoint,
    /// Completed phases in order.
    #[serde(default)]
    pub phase_history: Vec<PhaseHistoryEntry>,
    /// The failure that moved this operation to `Failed`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    /// A non-fatal cleanup failure, recorded without failing the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_failure: Option<FailureRecord>,
}

impl ReshardState {
    /// Creates the state for a newly admitted plan.
    ///
    /// Planning is complete by construction — the plan in hand *is* its
    /// output — so the state enters at `Copying` with a Planning history
    /// entry spanning plan generation to admission.
    #[must_use]
    pub fn admitted(plan: ReshardPlan) -> Self {
        let now = Utc::now();
        Self {
            id: ReshardId::generate(),
            current_phase: ReshardPhase::Copying,
            phase_history: vec![PhaseHistoryEntry {
                phase: ReshardPhase::Planning,
                started_at: plan.created_at,
                completed_at: now,
            }],
            last_completed_phase: Some(ReshardPhase::Planning),
            started_at: now,
            phase_started_at: now,
            cutover_at: None,
            checkpoint: ReshardCheckpoint::default(),
            progress: BTreeMap::new(),
            failure: None,
            cleanup_failure: None,
            plan,
        }
    }

    /// Returns true if the operation reached a terminal phase.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.current_phase.is_terminal()
    }

    /// Returns the progress counters for a step, creating them on first
    /// touch.
    pub fn step_progress_mut(&mut self, step_id: &str) -> &mut StepProgress {
        self.progress.entry(step_id.to_string()).or_default()
    }

    /// Records one completed copy batch: bumps the row counter and advances
    /// the step's resume cursor.
    pub fn record_copy_batch(&mut self, step_id: &str, rows: u64, cursor: BatchCursor) {
        self.step_progress_mut(step_id).rows_copied += rows;
        self.checkpoint
            .copy_cursors
            .insert(step_id.to_string(), cursor);
    }

    /// Records one replication poll: bumps the row counter and advances the
    /// step's change-stream position.
    pub fn record_replication(&mut self, step_id: &str, rows: u64, position: CdcPosition) {
        self.step_progress_mut(step_id).rows_replicated += rows;
        self.checkpoint
            .cdc_positions
            .insert(step_id.to_string(), position);
    }

    /// Latches a step as verified.
    pub fn mark_verified(&mut self, step_id: &str) {
        self.step_progress_mut(step_id).is_verified = true;
    }

    /// Completes the current phase: appends its history entry, clears the
    /// checkpoint, and advances to the next phase.
    ///
    /// # Errors
    ///
    /// Returns an error if the current phase is terminal.
    #[tracing::instrument(skip(self), fields(reshard_id = %self.id, phase = %self.current_phase))]
    pub fn complete_phase(&mut self) -> Result<()> {
        let phase = self.current_phase;
        let Some(next) = phase.next() else {
            return Err(Error::InvalidPhaseTransition {
                from: phase,
                to: phase,
                reason: "terminal phase cannot complete".into(),
            });
        };

        let now = Utc::now();
        self.phase_history.push(PhaseHistoryEntry {
            phase,
            started_at: self.phase_started_at,
            completed_at: now,
        });
        self.last_completed_phase = Some(phase);
        self.checkpoint.clear();
        self.current_phase = next;
        self.phase_started_at = now;
        Ok(())
    }

    /// Moves the operation to `Failed`, recording the cause.
    ///
    /// # Errors
    ///
    /// Returns an error if `Failed` is not reachable from the current phase
    /// (Planning, CleaningUp, and terminal states cannot fail the
    /// operation).
    #[tracing::instrument(skip(self, error), fields(reshard_id = %self.id, phase = %self.current_phase))]
    pub fn record_failure(&mut self, error: &Error) -> Result<()> {
        if !self.current_phase.can_transition_to(ReshardPhase::Failed) {
            return Err(Error::InvalidPhaseTransition {
                from: self.current_phase,
                to: ReshardPhase::Failed,
                reason: "phase cannot fail the operation".into(),
            });
        }
        self.failure = Some(FailureRecord::from_error(error));
        self.current_phase = ReshardPhase::Failed;
        Ok(())
    }

    /// Moves a failed operation to `RolledBack`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the operation is currently `Failed`.
    pub fn mark_rolled_back(&mut self) -> Result<()> {
        if !self
            .current_phase
            .can_transition_to(ReshardPhase::RolledBack)
        {
            return Err(Error::InvalidPhaseTransition {
                from: self.current_phase,
                to: ReshardPhase::RolledBack,
                reason: "only a failed operation can be rolled back".into(),
            });
        }
        self.current_phase = ReshardPhase::RolledBack;
        Ok(())
    }

    /// Records the moment the topology swap completed.
    pub fn set_cutover_at(&mut self, at: DateTime<Utc>) {
        self.cutover_at = Some(at);
    }

    /// Records a non-fatal cleanup failure.
    pub fn record_cleanup_failure(&mut self, error: &Error) {
        self.cleanup_failure = Some(FailureRecord::from_error(error));
    }

    /// Total rows copied across all steps.
    #[must_use]
    pub fn total_rows_copied(&self) -> u64 {
        self.progress.values().map(|p| p.rows_copied).sum()
    }
}

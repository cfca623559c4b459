//! Error types for the resharding domain.
//!
//! Every fallible operation returns [`Result`]; errors never cross the
//! orchestrator boundary as panics. [`ErrorKind`] is the serializable
//! classification persisted in failure records, so a restarted process can
//! still see *why* a past operation failed even though the rich [`Error`]
//! value is gone.

use serde::{Deserialize, Serialize};

use reshard_core::{ReshardId, ShardId};

use crate::phase::ReshardPhase;
use crate::state::RangeMismatch;

/// The result type used throughout reshard-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Serializable classification of a resharding error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Old and new topology are identical; there is nothing to plan.
    TopologiesIdentical,
    /// Topologies differ but the diff produced no data movement.
    EmptyPlan,
    /// Estimation or shard reachability failed during planning.
    PlanGenerationFailed,
    /// A bulk-copy batch failed.
    CopyFailed,
    /// Incremental change replay failed.
    ReplicationFailed,
    /// Source/target consistency verification failed or mismatched.
    VerificationFailed,
    /// The atomic topology swap exceeded its hard timeout.
    CutoverTimeout,
    /// The cutover gate predicate declined the switch.
    CutoverAborted,
    /// The atomic topology swap itself failed.
    CutoverFailed,
    /// Source-row cleanup failed. Non-fatal: recorded, never terminal.
    CleanupFailed,
    /// A rollback step failed; safe to retry.
    RollbackFailed,
    /// Rollback is no longer possible for this operation.
    RollbackNotAvailable,
    /// Another resharding operation is already active.
    ConcurrentReshardingNotAllowed,
    /// The durable state store failed.
    StateStoreFailed,
    /// An invalid phase transition was attempted.
    InvalidPhaseTransition,
    /// The operation was cancelled cooperatively; state remains resumable.
    OperationCancelled,
    /// No operation with the requested ID exists in the store.
    OperationNotFound,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TopologiesIdentical => "TOPOLOGIES_IDENTICAL",
            Self::EmptyPlan => "EMPTY_PLAN",
            Self::PlanGenerationFailed => "PLAN_GENERATION_FAILED",
            Self::CopyFailed => "COPY_FAILED",
            Self::ReplicationFailed => "REPLICATION_FAILED",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::CutoverTimeout => "CUTOVER_TIMEOUT",
            Self::CutoverAborted => "CUTOVER_ABORTED",
            Self::CutoverFailed => "CUTOVER_FAILED",
            Self::CleanupFailed => "CLEANUP_FAILED",
            Self::RollbackFailed => "ROLLBACK_FAILED",
            Self::RollbackNotAvailable => "ROLLBACK_NOT_AVAILABLE",
            Self::ConcurrentReshardingNotAllowed => "CONCURRENT_RESHARDING_NOT_ALLOWED",
            Self::StateStoreFailed => "STATE_STORE_FAILED",
            Self::InvalidPhaseTransition => "INVALID_PHASE_TRANSITION",
            Self::OperationCancelled => "OPERATION_CANCELLED",
            Self::OperationNotFound => "OPERATION_NOT_FOUND",
        };
        f.write_str(s)
    }
}

/// Errors that can occur in resharding operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Old and new topology are identical.
    #[error("topologies are identical; nothing to reshard")]
    TopologiesIdentical,

    /// Topologies differ but no data needs to move.
    #[error("plan is empty: {message}")]
    EmptyPlan {
        /// Why the diff degenerated.
        message: String,
    },

    /// Plan generation failed before any plan was produced.
    #[error("plan generation failed: {message}")]
    PlanGenerationFailed {
        /// Description of the failure.
        message: String,
    },

    /// A bulk-copy batch failed for a step.
    #[error("copy failed for step {step}: {message}")]
    CopyFailed {
        /// Full step identity (`source->target/range`).
        step: String,
        /// Description of the failure.
        message: String,
    },

    /// Incremental change replay failed for a step.
    #[error("replication failed for step {step}: {message}")]
    ReplicationFailed {
        /// Full step identity.
        step: String,
        /// Description of the failure.
        message: String,
    },

    /// Consistency verification failed.
    #[error("verification failed: {message}")]
    VerificationFailed {
        /// Description of the failure.
        message: String,
        /// Per-range mismatch details, retained in full for diagnosis.
        mismatches: Vec<RangeMismatch>,
    },

    /// The atomic topology swap did not return within the hard timeout.
    /// The original topology is guaranteed unchanged.
    #[error("cutover timed out after {timeout_ms} ms; topology unchanged")]
    CutoverTimeout {
        /// The configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The caller-supplied gate predicate declined the cutover.
    #[error("cutover aborted by gate predicate; topology unchanged")]
    CutoverAborted,

    /// The topology swap failed.
    #[error("cutover failed: {message}")]
    CutoverFailed {
        /// Description of the failure.
        message: String,
    },

    /// Source-row cleanup failed. Recorded on the result; never terminal.
    #[error("cleanup failed on shard {shard}: {message}")]
    CleanupFailed {
        /// The shard whose rows could not be cleaned.
        shard: ShardId,
        /// Description of the failure.
        message: String,
    },

    /// A rollback step failed. Rollback is idempotent and safe to retry.
    #[error("rollback failed: {message}")]
    RollbackFailed {
        /// Description of the failure.
        message: String,
    },

    /// Rollback is not possible: source data may already be purged and the
    /// topology switch is final.
    #[error("rollback not available after {last_completed_phase} completed")]
    RollbackNotAvailable {
        /// The phase whose completion forecloses rollback.
        last_completed_phase: ReshardPhase,
    },

    /// Exactly one resharding operation may be active at a time.
    #[error("resharding {active} is already active; concurrent resharding is not allowed")]
    ConcurrentReshardingNotAllowed {
        /// The operation currently holding the active slot.
        active: ReshardId,
    },

    /// The durable state store failed. Fatal to the current tick; the
    /// in-memory attempt is safe to retry since nothing was persisted.
    #[error("state store failed: {message}")]
    StateStoreFailed {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An invalid phase transition was attempted.
    #[error("invalid phase transition: {from} -> {to} ({reason})")]
    InvalidPhaseTransition {
        /// The current phase.
        from: ReshardPhase,
        /// The attempted target phase.
        to: ReshardPhase,
        /// Why the transition is invalid.
        reason: String,
    },

    /// The operation was cancelled between batches. Its checkpoint is
    /// consistent and it can be resumed.
    #[error("resharding {id} cancelled; state is resumable from its checkpoint")]
    OperationCancelled {
        /// The cancelled operation.
        id: ReshardId,
    },

    /// No operation with this ID exists in the store.
    #[error("resharding operation not found: {id}")]
    OperationNotFound {
        /// The ID that was looked up.
        id: ReshardId,
    },

    /// An error from reshard-core.
    #[error("core error: {0}")]
    Core(#[from] reshard_core::Error),
}

impl Error {
    /// Creates a new state-store error.
    #[must_use]
    pub fn state_store(message: impl Into<String>) -> Self {
        Self::StateStoreFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new state-store error with an underlying cause.
    #[must_use]
    pub fn state_store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StateStoreFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the serializable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TopologiesIdentical => ErrorKind::TopologiesIdentical,
            Self::EmptyPlan { .. } => ErrorKind::EmptyPlan,
            Self::PlanGenerationFailed { .. } | Self::Core(_) => ErrorKind::PlanGenerationFailed,
            Self::CopyFailed { .. } => ErrorKind::CopyFailed,
            Self::ReplicationFailed { .. } => ErrorKind::ReplicationFailed,
            Self::VerificationFailed { .. } => ErrorKind::VerificationFailed,
            Self::CutoverTimeout { .. } => ErrorKind::CutoverTimeout,
            Self::CutoverAborted => ErrorKind::CutoverAborted,
            Self::CutoverFailed { .. } => ErrorKind::CutoverFailed,
            Self::CleanupFailed { .. } => ErrorKind::CleanupFailed,
            Self::RollbackFailed { .. } => ErrorKind::RollbackFailed,
            Self::RollbackNotAvailable { .. } => ErrorKind::RollbackNotAvailable,
            Self::ConcurrentReshardingNotAllowed { .. } => {
                ErrorKind::ConcurrentReshardingNotAllowed
            }
            Self::StateStoreFailed { .. } => ErrorKind::StateStoreFailed,
            Self::InvalidPhaseTransition { .. } => ErrorKind::InvalidPhaseTransition,
            Self::OperationCancelled { .. } => ErrorKind::OperationCancelled,
            Self::OperationNotFound { .. } => ErrorKind::OperationNotFound,
        }
    }

    /// Returns the mismatch details if this is a verification failure.
    #[must_use]
    pub fn mismatches(&self) -> &[RangeMismatch] {
        match self {
            Self::VerificationFailed { mismatches, .. } => mismatches,
            _ => &[],
        }
    }
}

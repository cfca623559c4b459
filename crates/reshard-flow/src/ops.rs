//! Consumed per-shard operation interfaces.
//!
//! The orchestrator never performs data I/O itself; every row touched goes
//! through [`ShardOperations`], and the live routing table is read through
//! [`TopologyProvider`]. Implementations own the SQL/driver mechanics and
//! must be safe to call concurrently, one in-flight call per migration step.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use reshard_core::{KeyRange, ShardId, ShardTopology};

/// The result type for collaborator calls.
pub type OpsResult<T> = std::result::Result<T, OpsError>;

/// Error raised by a shard-operations or topology-provider implementation.
///
/// Deliberately opaque: the orchestrator classifies it by the phase it
/// occurred in, not by its cause.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct OpsError {
    /// Description of the failure.
    message: String,
    /// The underlying cause, if any.
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl OpsError {
    /// Creates a new operations error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new operations error with an underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Opaque resume cursor for bulk copy, scoped to one migration step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchCursor(String);

impl BatchCursor {
    /// Creates a cursor from its opaque string form.
    #[must_use]
    pub fn new(cursor: impl Into<String>) -> Self {
        Self(cursor.into())
    }

    /// Borrows the opaque string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Opaque change-stream position for incremental replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CdcPosition(String);

impl CdcPosition {
    /// Creates a position from its opaque string form.
    #[must_use]
    pub fn new(position: impl Into<String>) -> Self {
        Self(position.into())
    }

    /// Borrows the opaque string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Result of one bulk-copy batch.
#[derive(Debug, Clone)]
pub struct CopyBatch {
    /// Rows copied in this batch.
    pub rows_copied: u64,
    /// Cursor to resume from after this batch.
    pub next_cursor: BatchCursor,
    /// True if more rows remain in the range.
    pub has_more: bool,
}

/// Result of one incremental replication poll.
#[derive(Debug, Clone)]
pub struct ReplicationBatch {
    /// Changes replayed in this poll.
    pub rows_replicated: u64,
    /// Change-stream position after this poll.
    pub new_position: CdcPosition,
    /// Remaining replication lag after this poll.
    pub lag: Duration,
}

/// Cardinality estimate for a key range on a shard.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeEstimate {
    /// Estimated row count.
    pub rows: u64,
    /// Estimated byte size.
    pub bytes: u64,
}

/// How thoroughly to compare source and target during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationMode {
    /// Row counts only. Fast, weak.
    CountOnly,
    /// Content checksums only.
    ChecksumOnly,
    /// Row counts and content checksums. Strongest; the default.
    CountAndChecksum,
}

impl Default for VerificationMode {
    fn default() -> Self {
        Self::CountAndChecksum
    }
}

impl std::fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CountOnly => write!(f, "COUNT_ONLY"),
            Self::ChecksumOnly => write!(f, "CHECKSUM_ONLY"),
            Self::CountAndChecksum => write!(f, "COUNT_AND_CHECKSUM"),
        }
    }
}

/// Result of a consistency check over one range.
#[derive(Debug, Clone)]
pub struct RangeVerification {
    /// True if source and target agree under the requested mode.
    pub is_consistent: bool,
    /// Row count observed on the source shard.
    pub source_count: u64,
    /// Row count observed on the target shard.
    pub target_count: u64,
    /// Implementation-specific diagnosis (e.g. first divergent checksum
    /// block), when inconsistent.
    pub detail: Option<String>,
}

/// Per-shard data primitives consumed by the orchestrator.
///
/// All methods are fallible and must be idempotent where noted; the
/// orchestrator retries at the batch boundary after crash recovery, so an
/// implementation observing the same cursor twice must tolerate re-copying
/// that batch (at-least-once semantics).
#[async_trait]
pub trait ShardOperations: Send + Sync {
    /// Estimates rows and bytes for `range` on `shard`.
    ///
    /// Used only during planning; estimation failures fail the whole plan.
    async fn estimate_range(&self, shard: &ShardId, range: &KeyRange)
        -> OpsResult<RangeEstimate>;

    /// Copies up to `batch_size` rows of `range` from `source` to `target`,
    /// starting after `cursor` (or from the beginning of the range when
    /// `cursor` is `None`).
    async fn copy_batch(
        &self,
        source: &ShardId,
        target: &ShardId,
        range: &KeyRange,
        batch_size: u32,
        cursor: Option<&BatchCursor>,
    ) -> OpsResult<CopyBatch>;

    /// Replays incremental changes for `range` from `source` to `target`,
    /// starting after `position` (or from the copy snapshot when `None`).
    async fn replicate_changes(
        &self,
        source: &ShardId,
        target: &ShardId,
        range: &KeyRange,
        position: Option<&CdcPosition>,
    ) -> OpsResult<ReplicationBatch>;

    /// Returns the current change-stream lag for `source`.
    async fn replication_lag(&self, source: &ShardId) -> OpsResult<Duration>;

    /// Compares source and target consistency for `range` under `mode`.
    async fn verify_range(
        &self,
        source: &ShardId,
        target: &ShardId,
        range: &KeyRange,
        mode: VerificationMode,
    ) -> OpsResult<RangeVerification>;

    /// Atomically installs `topology` as the live routing table.
    ///
    /// All-or-nothing by contract: on any failure (including timeout at the
    /// caller) the previous topology remains live.
    async fn swap_topology(&self, topology: &ShardTopology) -> OpsResult<()>;

    /// Deletes up to `batch_size` rows of `range` on `shard`, returning the
    /// number deleted. Idempotent: deleting an already-clean range returns 0.
    async fn cleanup_range(
        &self,
        shard: &ShardId,
        range: &KeyRange,
        batch_size: u32,
    ) -> OpsResult<u64>;
}

/// Supplies the live topology for planning and post-cutover verification.
#[async_trait]
pub trait TopologyProvider: Send + Sync {
    /// Returns the topology currently serving traffic.
    async fn current_topology(&self) -> OpsResult<ShardTopology>;
}

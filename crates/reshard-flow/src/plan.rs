//! Resharding plans: the immutable output of the topology diff.
//!
//! A plan specifies exactly which data moves where. Plans are:
//!
//! - **Immutable**: never modified after the planner returns them
//! - **Serializable**: embedded in persisted state for crash recovery
//! - **Self-contained**: both topologies ride along, so a resumed or
//!   rolled-back operation needs nothing beyond the plan itself

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reshard_core::{KeyRange, PlanId, ShardId, ShardTopology};

/// One unit of data movement: a key range migrating from a source shard to a
/// target shard.
///
/// Multiple steps may share a (source, target) pair when their ranges are
/// disjoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStep {
    /// Shard currently owning the range.
    pub source: ShardId,
    /// Shard that will own the range in the new topology.
    pub target: ShardId,
    /// The half-open key range to migrate.
    pub range: KeyRange,
    /// Estimated row count for the range, from cardinality estimation.
    pub estimated_rows: u64,
}

impl MigrationStep {
    /// Returns the reporting key for this step's shard pair.
    ///
    /// Progress is reported per `"source->target"` pair; steps sharing a
    /// pair aggregate under one key.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}->{}", self.source, self.target)
    }

    /// Returns the full step identity, unique within a plan.
    ///
    /// Used for per-step checkpoint and progress bookkeeping, where steps
    /// sharing a shard pair must not collide.
    #[must_use]
    pub fn id(&self) -> String {
        format!(
            "{}->{}/{}..{}",
            self.source, self.target, self.range.start, self.range.end
        )
    }
}

/// Aggregate size estimate for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEstimate {
    /// Total rows expected to move.
    pub total_rows: u64,
    /// Total bytes expected to move.
    pub total_bytes: u64,
    /// Expected wall-clock duration of the copy phase in milliseconds.
    pub estimated_duration_ms: u64,
}

impl PlanEstimate {
    /// Returns the expected copy duration as a `Duration`.
    #[must_use]
    pub const fn estimated_duration(&self) -> Duration {
        Duration::from_millis(self.estimated_duration_ms)
    }
}

/// An immutable resharding plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReshardPlan {
    /// Unique plan identifier.
    pub id: PlanId,
    /// When the plan was generated.
    pub created_at: DateTime<Utc>,
    /// The topology data currently lives under.
    pub old_topology: ShardTopology,
    /// The topology data is migrating to.
    pub new_topology: ShardTopology,
    /// Optional entity-kind constraint: when present, only these entity
    /// kinds are in scope for the migration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_kinds: Option<BTreeSet<String>>,
    /// Migration steps in key order. Never empty.
    pub steps: Vec<MigrationStep>,
    /// Aggregate size estimate.
    pub estimate: PlanEstimate,
}

impl ReshardPlan {
    /// Returns the number of migration steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the plan has no steps.
    ///
    /// The planner never produces such a plan; this exists for defensive
    /// re-validation at execution admission.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the distinct source shards across all steps, in order.
    #[must_use]
    pub fn source_shards(&self) -> Vec<&ShardId> {
        let mut seen = BTreeSet::new();
        self.steps
            .iter()
            .filter(|s| seen.insert(&s.source))
            .map(|s| &s.source)
            .collect()
    }
}

//! Topology diff planning.
//!
//! The planner computes exactly which data must move between two topologies.
//! Ranges that map to the same shard in both topologies are omitted — this
//! is the optimization that makes resharding "online": untouched data is
//! never copied.
//!
//! Planning never touches data. Its only I/O is cardinality estimation, and
//! any estimation failure fails the whole call — there are no partial plans.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::info;

use reshard_core::{KeyRange, PlanId, ShardId, ShardTopology};

use crate::error::{Error, Result};
use crate::ops::ShardOperations;
use crate::plan::{MigrationStep, PlanEstimate, ReshardPlan};

/// Default sustained bulk-copy throughput assumed for duration estimates.
const DEFAULT_COPY_ROWS_PER_SEC: u64 = 50_000;

/// Request to generate a resharding plan.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    /// The topology data currently lives under.
    pub old_topology: ShardTopology,
    /// The topology data should migrate to.
    pub new_topology: ShardTopology,
    /// Optional entity-kind constraint: when present, only these entity
    /// kinds are in scope. Carried on the plan for collaborators to honor.
    pub entity_kinds: Option<BTreeSet<String>>,
}

/// Computes migration steps from a topology diff.
#[derive(Debug, Clone)]
pub struct Planner {
    /// Assumed copy throughput for duration estimates, in rows/sec.
    copy_rows_per_sec: u64,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    /// Creates a planner with the default throughput assumption.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            copy_rows_per_sec: DEFAULT_COPY_ROWS_PER_SEC,
        }
    }

    /// Creates a planner with a custom throughput assumption for duration
    /// estimates.
    #[must_use]
    pub const fn with_copy_throughput(rows_per_sec: u64) -> Self {
        Self {
            copy_rows_per_sec: if rows_per_sec == 0 {
                1
            } else {
                rows_per_sec
            },
        }
    }

    /// Generates a plan for migrating from `old_topology` to `new_topology`.
    ///
    /// # Errors
    ///
    /// - [`Error::TopologiesIdentical`] when old and new are structurally
    ///   equal
    /// - [`Error::EmptyPlan`] when the topologies differ but no data moves
    /// - [`Error::PlanGenerationFailed`] on estimation failure or an invalid
    ///   constraint set
    #[tracing::instrument(skip_all, fields(
        old_version = request.old_topology.version(),
        new_version = request.new_topology.version(),
    ))]
    pub async fn plan(
        &self,
        ops: &dyn ShardOperations,
        request: PlanRequest,
    ) -> Result<ReshardPlan> {
        if request.old_topology == request.new_topology {
            return Err(Error::TopologiesIdentical);
        }
        if let Some(kinds) = &request.entity_kinds {
            if kinds.is_empty() {
                return Err(Error::PlanGenerationFailed {
                    message: "entity-kind constraint set is empty".into(),
                });
            }
        }

        let movements = diff_movements(&request.old_topology, &request.new_topology);
        if movements.is_empty() {
            return Err(Error::EmptyPlan {
                message: "every range maps to its current shard".into(),
            });
        }

        let mut steps = Vec::with_capacity(movements.len());
        let mut total_rows = 0u64;
        let mut total_bytes = 0u64;
        for (source, target, range) in movements {
            let estimate = ops
                .estimate_range(&source, &range)
                .await
                .map_err(|e| Error::PlanGenerationFailed {
                    message: format!("estimating {range} on {source}: {e}"),
                })?;
            total_rows += estimate.rows;
            total_bytes += estimate.bytes;
            steps.push(MigrationStep {
                source,
                target,
                range,
                estimated_rows: estimate.rows,
            });
        }

        if total_rows == 0 {
            return Err(Error::EmptyPlan {
                message: "migrating ranges hold no data".into(),
            });
        }

        let plan = ReshardPlan {
            id: PlanId::generate(),
            created_at: Utc::now(),
            old_topology: request.old_topology,
            new_topology: request.new_topology,
            entity_kinds: request.entity_kinds,
            estimate: PlanEstimate {
                total_rows,
                total_bytes,
                estimated_duration_ms: total_rows.saturating_mul(1_000) / self.copy_rows_per_sec,
            },
            steps,
        };

        info!(
            plan_id = %plan.id,
            steps = plan.len(),
            total_rows,
            "generated resharding plan"
        );
        Ok(plan)
    }
}

/// Computes the raw data movements between two topologies.
///
/// For every range in the new topology, finds the old-topology owner(s) of
/// the overlapping keyspace and emits one movement per (old-owner,
/// new-owner) pair where they differ. Keyspace beyond the old topology's
/// declared coverage belongs to its final shard (range-split convention);
/// keyspace before the old coverage start has no owner and therefore no
/// data. Adjacent fragments for the same shard pair coalesce.
fn diff_movements(
    old: &ShardTopology,
    new: &ShardTopology,
) -> Vec<(ShardId, ShardId, KeyRange)> {
    let mut by_pair: BTreeMap<(ShardId, ShardId), Vec<KeyRange>> = BTreeMap::new();

    for assignment in new.assignments() {
        for (owner, fragment) in old_owners_of(old, &assignment.range) {
            if owner != assignment.shard {
                by_pair
                    .entry((owner, assignment.shard.clone()))
                    .or_default()
                    .push(fragment);
            }
        }
    }

    let mut movements = Vec::new();
    for ((source, target), mut fragments) in by_pair {
        fragments.sort_by_key(|r| r.start);
        let mut coalesced: Vec<KeyRange> = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            match coalesced.last_mut() {
                Some(last) if last.abuts(&fragment) => *last = last.joined_with(&fragment),
                _ => coalesced.push(fragment),
            }
        }
        for range in coalesced {
            movements.push((source.clone(), target.clone(), range));
        }
    }

    movements.sort_by(|a, b| a.2.start.cmp(&b.2.start).then_with(|| a.2.end.cmp(&b.2.end)));
    movements
}

/// Yields `(owner, fragment)` pairs covering the parts of `range` that hold
/// data under `old`, splitting at declared assignment boundaries and
/// attributing the tail beyond declared coverage to the final shard.
fn old_owners_of(old: &ShardTopology, range: &KeyRange) -> Vec<(ShardId, KeyRange)> {
    let mut fragments: Vec<(ShardId, KeyRange)> = old
        .owners_overlapping(range)
        .map(|(shard, fragment)| (shard.clone(), fragment))
        .collect();

    let coverage_end = old.coverage_end();
    if range.end > coverage_end {
        let tail_start = range.start.max(coverage_end);
        if let Ok(tail) = KeyRange::new(tail_start, range.end) {
            fragments.push((old.last_assignment().shard.clone(), tail));
        }
    }

    fragments
}

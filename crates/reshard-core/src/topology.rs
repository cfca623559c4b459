//! Shard topologies: the versioned mapping from key ranges to shards.
//!
//! A topology is an ordered, immutable description of which shard owns which
//! slice of the keyspace. Construction validates the whole structure up
//! front; once built, a topology is never mutated — resharding produces a
//! *new* topology and migrates data between the two.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::ShardId;
use crate::range::KeyRange;

/// One shard's slice of the keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardAssignment {
    /// The shard owning the range.
    pub shard: ShardId,
    /// The half-open key range assigned to the shard.
    pub range: KeyRange,
}

impl ShardAssignment {
    /// Creates a new shard assignment.
    #[must_use]
    pub fn new(shard: impl Into<ShardId>, range: KeyRange) -> Self {
        Self {
            shard: shard.into(),
            range,
        }
    }
}

/// An ordered, immutable description of shards and their key-range
/// assignments, versioned as a whole.
///
/// Invariants established at construction:
/// - at least one assignment
/// - assignments sorted by range start
/// - ranges contiguous: each starts exactly where the previous one ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardTopology {
    /// Monotonic topology version; bumped on every swap.
    version: u64,
    /// Assignments sorted by range start.
    assignments: Vec<ShardAssignment>,
}

impl ShardTopology {
    /// Builds a validated topology from a set of assignments.
    ///
    /// # Errors
    ///
    /// Returns an error if the assignment list is empty, out of order,
    /// overlapping, or leaves holes in its covered keyspace.
    pub fn new(version: u64, mut assignments: Vec<ShardAssignment>) -> Result<Self> {
        if assignments.is_empty() {
            return Err(Error::invalid_topology("topology has no shard assignments"));
        }

        assignments.sort_by_key(|a| a.range.start);

        for window in assignments.windows(2) {
            let (prev, next) = (&window[0], &window[1]);
            if prev.range.overlaps(&next.range) {
                return Err(Error::invalid_topology(format!(
                    "ranges {} ({}) and {} ({}) overlap",
                    prev.range, prev.shard, next.range, next.shard
                )));
            }
            if !prev.range.abuts(&next.range) {
                return Err(Error::invalid_topology(format!(
                    "hole in keyspace between {} and {}",
                    prev.range, next.range
                )));
            }
        }

        Ok(Self {
            version,
            assignments,
        })
    }

    /// Returns the topology version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns the assignments in key order.
    #[must_use]
    pub fn assignments(&self) -> &[ShardAssignment] {
        &self.assignments
    }

    /// Returns the number of shards in the topology.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.assignments.len()
    }

    /// Returns the inclusive start of the covered keyspace.
    #[must_use]
    pub fn coverage_start(&self) -> u64 {
        self.assignments[0].range.start
    }

    /// Returns the exclusive end of the declared keyspace coverage.
    #[must_use]
    pub fn coverage_end(&self) -> u64 {
        self.assignments[self.assignments.len() - 1].range.end
    }

    /// Returns the final assignment in key order.
    ///
    /// By the range-split convention, the final shard also owns any keyspace
    /// beyond the declared coverage end.
    #[must_use]
    pub fn last_assignment(&self) -> &ShardAssignment {
        &self.assignments[self.assignments.len() - 1]
    }

    /// Returns the shard owning `key`, if the key falls inside the declared
    /// coverage.
    #[must_use]
    pub fn owner_of(&self, key: u64) -> Option<&ShardId> {
        self.assignments
            .iter()
            .find(|a| a.range.contains(key))
            .map(|a| &a.shard)
    }

    /// Yields `(shard, fragment)` pairs for every declared assignment that
    /// overlaps `range`, in key order.
    pub fn owners_overlapping<'a>(
        &'a self,
        range: &'a KeyRange,
    ) -> impl Iterator<Item = (&'a ShardId, KeyRange)> + 'a {
        self.assignments
            .iter()
            .filter_map(move |a| a.range.intersect(range).map(|frag| (&a.shard, frag)))
    }
}

//! Property-based tests for planner and progress invariants.
//!
//! These tests use proptest to verify invariants hold across randomly
//! generated topology pairs over a fixed `[0, 100)` keyspace.

mod common;

use chrono::Utc;
use futures::executor::block_on;
use proptest::prelude::*;

use reshard_core::{KeyRange, PlanId, ShardAssignment, ShardId, ShardTopology};
use reshard_flow::error::Error;
use reshard_flow::phase::ReshardPhase;
use reshard_flow::plan::{MigrationStep, PlanEstimate, ReshardPlan};
use reshard_flow::planner::{PlanRequest, Planner};
use reshard_flow::progress::overall_percent;
use reshard_flow::state::ReshardState;

use common::MockShardBackend;

const KEYSPACE_END: u64 = 100;

/// Generates a topology covering `[0, 100)` with 1-4 shards drawn from a
/// small name pool (adjacent segments may repeat a shard).
fn arb_topology(version: u64) -> impl Strategy<Value = ShardTopology> {
    prop::collection::btree_set(1u64..KEYSPACE_END, 0..4).prop_flat_map(move |cuts| {
        let mut bounds = vec![0u64];
        bounds.extend(cuts.iter().copied());
        bounds.push(KEYSPACE_END);
        let segments = bounds.len() - 1;
        prop::collection::vec(
            prop::sample::select(vec!["a", "b", "c", "d", "e", "f"]),
            segments,
        )
        .prop_map(move |names| {
            let assignments = names
                .iter()
                .zip(bounds.windows(2))
                .map(|(name, window)| {
                    ShardAssignment::new(
                        *name,
                        KeyRange::new(window[0], window[1]).expect("valid segment"),
                    )
                })
                .collect();
            ShardTopology::new(version, assignments).expect("valid topology")
        })
    })
}

/// Seeds one row per key, placed on the key's owner in `topology`.
fn seed_owners(backend: &MockShardBackend, topology: &ShardTopology) {
    for key in 0..KEYSPACE_END {
        let owner = topology.owner_of(key).expect("full coverage").clone();
        backend.seed(owner, [key]);
    }
}

proptest! {
    /// Identical topologies always refuse to plan, regardless of shape.
    #[test]
    fn identical_topologies_never_plan(topology in arb_topology(1)) {
        let backend = MockShardBackend::new(topology.clone());
        let planner = Planner::new();
        let result = block_on(planner.plan(&backend, PlanRequest {
            old_topology: topology.clone(),
            new_topology: topology,
            entity_kinds: None,
        }));
        prop_assert!(matches!(result, Err(Error::TopologiesIdentical)));
    }

    /// A key is covered by exactly one step iff its owner changes, and that
    /// step names the key's old owner as source and new owner as target.
    #[test]
    fn steps_cover_exactly_the_keys_that_change_owner(
        old in arb_topology(1),
        new in arb_topology(2),
    ) {
        let backend = MockShardBackend::new(old.clone());
        seed_owners(&backend, &old);

        let planner = Planner::new();
        let result = block_on(planner.plan(&backend, PlanRequest {
            old_topology: old.clone(),
            new_topology: new.clone(),
            entity_kinds: None,
        }));

        match result {
            Ok(plan) => {
                for key in 0..KEYSPACE_END {
                    let old_owner = old.owner_of(key).expect("full coverage");
                    let new_owner = new.owner_of(key).expect("full coverage");
                    let covering: Vec<&MigrationStep> = plan
                        .steps
                        .iter()
                        .filter(|s| s.range.contains(key))
                        .collect();

                    if old_owner == new_owner {
                        prop_assert!(
                            covering.is_empty(),
                            "key {key} stays on {old_owner} but is covered"
                        );
                    } else {
                        prop_assert_eq!(covering.len(), 1, "key {} covered once", key);
                        prop_assert_eq!(&covering[0].source, old_owner);
                        prop_assert_eq!(&covering[0].target, new_owner);
                    }
                }
            }
            Err(Error::EmptyPlan { .. }) => {
                // legitimate only when no key changes owner
                for key in 0..KEYSPACE_END {
                    prop_assert_eq!(old.owner_of(key), new.owner_of(key));
                }
            }
            Err(other) => prop_assert!(false, "unexpected planning error: {}", other),
        }
    }

    /// The weighted percentage stays in bounds for arbitrary copy counters
    /// and reads 100 only once the operation completes.
    #[test]
    fn percent_is_bounded_and_saturates(
        copied_a in 0u64..10_000,
        copied_b in 0u64..10_000,
    ) {
        let range = |s, e| KeyRange::new(s, e).expect("valid range");
        let plan = ReshardPlan {
            id: PlanId::generate(),
            created_at: Utc::now(),
            old_topology: ShardTopology::new(
                1,
                vec![ShardAssignment::new("s0", range(0, 100))],
            ).expect("valid"),
            new_topology: ShardTopology::new(
                2,
                vec![
                    ShardAssignment::new("s1", range(0, 50)),
                    ShardAssignment::new("s2", range(50, 100)),
                ],
            ).expect("valid"),
            entity_kinds: None,
            steps: vec![
                MigrationStep {
                    source: ShardId::new("s0"),
                    target: ShardId::new("s1"),
                    range: range(0, 50),
                    estimated_rows: 100,
                },
                MigrationStep {
                    source: ShardId::new("s0"),
                    target: ShardId::new("s2"),
                    range: range(50, 100),
                    estimated_rows: 100,
                },
            ],
            estimate: PlanEstimate {
                total_rows: 200,
                total_bytes: 20_000,
                estimated_duration_ms: 4,
            },
        };

        let mut state = ReshardState::admitted(plan);
        let step_a = state.plan.steps[0].id();
        let step_b = state.plan.steps[1].id();
        state.step_progress_mut(&step_a).rows_copied = copied_a;
        state.step_progress_mut(&step_b).rows_copied = copied_b;

        let percent = overall_percent(&state);
        prop_assert!(percent >= 0.0);
        prop_assert!(percent < 100.0, "100 is reserved for Completed");

        while state.current_phase != ReshardPhase::Completed {
            state.complete_phase().expect("non-terminal");
        }
        let done = overall_percent(&state);
        prop_assert!((done - 100.0).abs() < f64::EPSILON);
    }
}

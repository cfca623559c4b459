//! Point-in-time progress reporting.
//!
//! A pure read path over persisted [`ReshardState`]: no side effects, never
//! blocks on in-flight work. Progress remains inspectable after failure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use reshard_core::ReshardId;

use crate::phase::ReshardPhase;
use crate::state::{ReshardState, StepProgress};

/// Ceiling applied to the copy-weighted percentage while the operation is
/// still in flight; exactly 100 is reserved for `Completed`.
const IN_FLIGHT_PERCENT_CEILING: f64 = 99.9;

/// A point-in-time snapshot of one resharding operation's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReshardProgress {
    /// The operation being reported on.
    pub id: ReshardId,
    /// The phase currently executing (or the terminal outcome).
    pub current_phase: ReshardPhase,
    /// Overall completion in `[0, 100]`. Reads exactly 100 only once the
    /// operation is `Completed`.
    pub overall_percent_complete: f64,
    /// Per-shard-pair progress, keyed `"source->target"`. Steps sharing a
    /// pair aggregate: row counters sum, verification latches AND together.
    pub per_step: BTreeMap<String, StepProgress>,
}

impl ReshardProgress {
    /// Derives a progress snapshot from persisted state.
    #[must_use]
    pub fn from_state(state: &ReshardState) -> Self {
        let mut per_step: BTreeMap<String, StepProgress> = BTreeMap::new();
        for step in &state.plan.steps {
            let recorded = state.progress.get(&step.id()).copied().unwrap_or_default();
            per_step
                .entry(step.key())
                .and_modify(|agg| {
                    agg.rows_copied += recorded.rows_copied;
                    agg.rows_replicated += recorded.rows_replicated;
                    agg.is_verified &= recorded.is_verified;
                })
                .or_insert(recorded);
        }

        Self {
            id: state.id,
            current_phase: state.current_phase,
            overall_percent_complete: overall_percent(state),
            per_step,
        }
    }
}

/// Computes the overall completion percentage for a state.
///
/// The estimated-row-share weighted average of `rows_copied/estimated_rows`
/// across steps, clamped to `[0, 100]`. Rows copied can exceed a step's
/// estimate under at-least-once semantics, so each step saturates at its
/// estimate. The result saturates just below 100 until the operation
/// reaches `Completed`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn overall_percent(state: &ReshardState) -> f64 {
    if state.current_phase == ReshardPhase::Completed {
        return 100.0;
    }

    let total_estimated: u64 = state.plan.steps.iter().map(|s| s.estimated_rows).sum();
    if total_estimated == 0 {
        return 0.0;
    }

    let copied: u64 = state
        .plan
        .steps
        .iter()
        .map(|step| {
            let recorded = state
                .progress
                .get(&step.id())
                .map_or(0, |p| p.rows_copied);
            recorded.min(step.estimated_rows)
        })
        .sum();

    let percent = (copied as f64 / total_estimated as f64) * 100.0;
    percent.clamp(0.0, IN_FLIGHT_PERCENT_CEILING)
}

//! Observability metrics for resharding.
//!
//! Exported via the `metrics` crate facade; install any compatible
//! recorder (e.g. `metrics-exporter-prometheus`) in the host process.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `reshard_flow_phase_transitions_total` | Counter | `from_phase`, `to_phase` | Phase transitions |
//! | `reshard_flow_phase_duration_seconds` | Histogram | `phase` | Phase wall-clock duration |
//! | `reshard_flow_rows_copied_total` | Counter | - | Rows bulk-copied |
//! | `reshard_flow_rows_replicated_total` | Counter | - | Incremental changes replayed |
//! | `reshard_flow_rows_cleaned_total` | Counter | - | Rows deleted by cleanup/rollback |
//! | `reshard_flow_active_operations` | Gauge | - | Non-terminal operations |
//! | `reshard_flow_cutovers_total` | Counter | `status` | Cutover outcomes |
//! | `reshard_flow_cleanup_failures_total` | Counter | - | Non-fatal cleanup failures |
//! | `reshard_flow_rollbacks_total` | Counter | `status` | Rollback outcomes |

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: total phase transitions.
    pub const PHASE_TRANSITIONS_TOTAL: &str = "reshard_flow_phase_transitions_total";
    /// Histogram: phase wall-clock duration in seconds.
    pub const PHASE_DURATION_SECONDS: &str = "reshard_flow_phase_duration_seconds";
    /// Counter: rows bulk-copied to target shards.
    pub const ROWS_COPIED_TOTAL: &str = "reshard_flow_rows_copied_total";
    /// Counter: incremental changes replayed to target shards.
    pub const ROWS_REPLICATED_TOTAL: &str = "reshard_flow_rows_replicated_total";
    /// Counter: rows deleted by cleanup or rollback purges.
    pub const ROWS_CLEANED_TOTAL: &str = "reshard_flow_rows_cleaned_total";
    /// Gauge: non-terminal resharding operations.
    pub const ACTIVE_OPERATIONS: &str = "reshard_flow_active_operations";
    /// Counter: cutover attempts by outcome.
    pub const CUTOVERS_TOTAL: &str = "reshard_flow_cutovers_total";
    /// Counter: non-fatal cleanup failures.
    pub const CLEANUP_FAILURES_TOTAL: &str = "reshard_flow_cleanup_failures_total";
    /// Counter: rollback attempts by outcome.
    pub const ROLLBACKS_TOTAL: &str = "reshard_flow_rollbacks_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Phase a transition left.
    pub const FROM_PHASE: &str = "from_phase";
    /// Phase a transition entered.
    pub const TO_PHASE: &str = "to_phase";
    /// Phase a duration was recorded for.
    pub const PHASE: &str = "phase";
    /// Outcome status (completed, aborted, timeout, failed).
    pub const STATUS: &str = "status";
}

/// High-level interface for recording resharding metrics.
///
/// Cheap to clone and share across per-step tasks.
#[derive(Debug, Clone, Default)]
pub struct ReshardMetrics;

impl ReshardMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records a phase transition.
    pub fn record_phase_transition(&self, from_phase: &str, to_phase: &str) {
        counter!(
            names::PHASE_TRANSITIONS_TOTAL,
            labels::FROM_PHASE => from_phase.to_string(),
            labels::TO_PHASE => to_phase.to_string(),
        )
        .increment(1);
    }

    /// Records a phase's wall-clock duration.
    pub fn observe_phase_duration(&self, phase: &str, duration: Duration) {
        histogram!(
            names::PHASE_DURATION_SECONDS,
            labels::PHASE => phase.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Adds bulk-copied rows.
    pub fn add_rows_copied(&self, rows: u64) {
        counter!(names::ROWS_COPIED_TOTAL).increment(rows);
    }

    /// Adds replayed incremental changes.
    pub fn add_rows_replicated(&self, rows: u64) {
        counter!(names::ROWS_REPLICATED_TOTAL).increment(rows);
    }

    /// Adds rows deleted by cleanup or rollback purges.
    pub fn add_rows_cleaned(&self, rows: u64) {
        counter!(names::ROWS_CLEANED_TOTAL).increment(rows);
    }

    /// Sets the number of non-terminal operations.
    #[allow(clippy::cast_precision_loss)] // Gauge values are 0 or 1 in practice
    pub fn set_active_operations(&self, count: usize) {
        gauge!(names::ACTIVE_OPERATIONS).set(count as f64);
    }

    /// Records a cutover outcome.
    pub fn record_cutover(&self, status: &str) {
        counter!(
            names::CUTOVERS_TOTAL,
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    /// Records a non-fatal cleanup failure.
    pub fn record_cleanup_failure(&self) {
        counter!(names::CLEANUP_FAILURES_TOTAL).increment(1);
    }

    /// Records a rollback outcome.
    pub fn record_rollback(&self, status: &str) {
        counter!(
            names::ROLLBACKS_TOTAL,
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed
    /// duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

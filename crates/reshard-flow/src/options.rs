//! Execution options: tuning knobs, observer hooks, and cancellation.
//!
//! Hooks are plain closures carried in the options value — not virtual
//! methods on a base type. The phase-completion hook receives an immutable
//! progress snapshot, so a callback cannot reach back into the live state
//! machine; the cutover hook is a predicate whose return value gates
//! control flow.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ops::VerificationMode;
use crate::phase::ReshardPhase;
use crate::plan::ReshardPlan;
use crate::progress::ReshardProgress;

/// Observer invoked after each phase completes.
pub type PhaseCompletedHook = Arc<dyn Fn(ReshardPhase, &ReshardProgress) + Send + Sync>;

/// Gate predicate invoked immediately before the topology swap. Returning
/// `false` aborts the cutover without touching the live topology.
pub type CutoverGate = Arc<dyn Fn(&ReshardPlan) -> bool + Send + Sync>;

/// Default rows per copy/cleanup batch.
const fn default_copy_batch_size() -> u32 {
    1_000
}

/// Default replication-lag threshold for leaving the Replicating phase: 5s.
const fn default_cdc_lag_threshold() -> Duration {
    Duration::from_secs(5)
}

/// Default hard timeout for the atomic topology swap: 30s.
const fn default_cutover_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Default delay between cutover and source cleanup: 15 minutes.
///
/// This window is the rollback safety margin — source rows must survive
/// long enough for an operator to notice a bad cutover.
const fn default_cleanup_retention() -> Duration {
    Duration::from_secs(15 * 60)
}

/// Options for one `execute`/`resume` invocation.
#[derive(Clone)]
pub struct ExecuteOptions {
    /// Rows requested per bulk-copy batch (also used for cleanup deletes).
    pub copy_batch_size: u32,
    /// Replication is considered caught up when lag drops below this.
    pub cdc_lag_threshold: Duration,
    /// How thoroughly Verifying compares source and target.
    pub verification_mode: VerificationMode,
    /// Hard timeout for the atomic topology swap.
    pub cutover_timeout: Duration,
    /// Delay between cutover and source-row cleanup.
    pub cleanup_retention_period: Duration,
    /// Invoked after each phase completes, with an immutable progress
    /// snapshot.
    pub on_phase_completed: Option<PhaseCompletedHook>,
    /// Predicate gating the topology swap.
    pub on_cutover_starting: Option<CutoverGate>,
    /// Cooperative cancellation signal, checked between batches/polls and
    /// at phase boundaries — never mid-batch-write.
    pub cancellation: CancellationToken,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            copy_batch_size: default_copy_batch_size(),
            cdc_lag_threshold: default_cdc_lag_threshold(),
            verification_mode: VerificationMode::default(),
            cutover_timeout: default_cutover_timeout(),
            cleanup_retention_period: default_cleanup_retention(),
            on_phase_completed: None,
            on_cutover_starting: None,
            cancellation: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("copy_batch_size", &self.copy_batch_size)
            .field("cdc_lag_threshold", &self.cdc_lag_threshold)
            .field("verification_mode", &self.verification_mode)
            .field("cutover_timeout", &self.cutover_timeout)
            .field("cleanup_retention_period", &self.cleanup_retention_period)
            .field("on_phase_completed", &self.on_phase_completed.is_some())
            .field("on_cutover_starting", &self.on_cutover_starting.is_some())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

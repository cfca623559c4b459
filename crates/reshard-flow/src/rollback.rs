//! Rollback of failed resharding operations.
//!
//! Given a failed result's rollback metadata, reverses effects according to
//! the last completed phase. Rollback is idempotent: re-invoking it after a
//! partial rollback failure is safe — purges converge on zero rows and the
//! topology restore is all-or-nothing by collaborator contract.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::metrics::ReshardMetrics;
use crate::ops::ShardOperations;
use crate::phase::ReshardPhase;
use crate::plan::{MigrationStep, ReshardPlan};
use crate::result::ReshardResult;
use crate::store::StateStore;

/// Rows per delete batch while purging target shards.
const PURGE_BATCH_SIZE: u32 = 1_000;

/// Reverses the effects of a failed resharding operation.
pub struct RollbackEngine {
    store: Arc<dyn StateStore>,
    ops: Arc<dyn ShardOperations>,
    metrics: ReshardMetrics,
}

impl RollbackEngine {
    /// Creates a rollback engine over the given collaborators.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, ops: Arc<dyn ShardOperations>) -> Self {
        Self {
            store,
            ops,
            metrics: ReshardMetrics::new(),
        }
    }

    /// Rolls back the operation behind `result`.
    ///
    /// Policy by last completed phase:
    ///
    /// | Last completed | Action |
    /// |---|---|
    /// | none / Planning | no-op — no data was written |
    /// | Copying / Replicating / Verifying | purge all rows written to target shards |
    /// | CuttingOver | restore the old topology, then purge target rows |
    /// | CleaningUp | `RollbackNotAvailable` — source data may already be purged |
    ///
    /// On success the persisted state transitions to `RolledBack`.
    ///
    /// # Errors
    ///
    /// - [`Error::RollbackFailed`] if the result has no metadata or a
    ///   reversal step fails (safe to retry)
    /// - [`Error::RollbackNotAvailable`] once cleanup has completed
    #[tracing::instrument(skip_all, fields(reshard_id = %result.id))]
    pub async fn rollback(&self, result: &ReshardResult) -> Result<()> {
        let metadata =
            result
                .rollback_metadata
                .as_ref()
                .ok_or_else(|| Error::RollbackFailed {
                    message: "result carries no rollback metadata".into(),
                })?;

        match metadata.last_completed_phase {
            None | Some(ReshardPhase::Planning) => {
                info!("no data written; rollback is a no-op");
            }
            Some(
                ReshardPhase::Copying | ReshardPhase::Replicating | ReshardPhase::Verifying,
            ) => {
                self.purge_targets(&metadata.original_plan).await?;
            }
            Some(ReshardPhase::CuttingOver) => {
                info!(
                    old_version = metadata.old_topology.version(),
                    "restoring pre-cutover topology"
                );
                self.ops
                    .swap_topology(&metadata.old_topology)
                    .await
                    .map_err(|e| Error::RollbackFailed {
                        message: format!("restoring old topology: {e}"),
                    })?;
                self.purge_targets(&metadata.original_plan).await?;
            }
            Some(phase) => {
                warn!(last_completed = %phase, "rollback no longer available");
                self.metrics.record_rollback("unavailable");
                return Err(Error::RollbackNotAvailable {
                    last_completed_phase: phase,
                });
            }
        }

        // Record the terminal outcome; skipped if a previous rollback
        // attempt already got this far.
        if let Some(mut state) = self.store.get(result.id).await? {
            if state.current_phase == ReshardPhase::Failed {
                state.mark_rolled_back()?;
                self.store.save(&state).await?;
            }
        }

        self.metrics.record_rollback("completed");
        info!("rollback completed");
        Ok(())
    }

    /// Deletes every row the plan's steps wrote to their target shards.
    async fn purge_targets(&self, plan: &ReshardPlan) -> Result<()> {
        let results = join_all(plan.steps.iter().map(|step| self.purge_target_step(step))).await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    async fn purge_target_step(&self, step: &MigrationStep) -> Result<()> {
        loop {
            let deleted = self
                .ops
                .cleanup_range(&step.target, &step.range, PURGE_BATCH_SIZE)
                .await
                .map_err(|e| Error::RollbackFailed {
                    message: format!("purging {} on {}: {e}", step.range, step.target),
                })?;
            self.metrics.add_rows_cleaned(deleted);
            if deleted == 0 {
                return Ok(());
            }
        }
    }
}

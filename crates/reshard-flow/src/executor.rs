//! The resharding orchestrator and its phase state machine.
//!
//! One logical control loop drives an operation through the phase chain.
//! Within a phase, per-step work runs in parallel — one task per migration
//! step — and the phase advances only after all tasks settle (a barrier,
//! not a pipeline). The machine performs no data I/O itself: every row goes
//! through [`ShardOperations`], every durable write through [`StateStore`].
//!
//! State is persisted after every batch, not just every phase transition;
//! that granularity is what bounds re-work after a crash. A resumed
//! operation re-enters its current phase at the last persisted cursor.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};

use reshard_core::{ReshardId, ShardTopology};

use crate::error::{Error, Result};
use crate::metrics::ReshardMetrics;
use crate::ops::{ShardOperations, TopologyProvider};
use crate::options::ExecuteOptions;
use crate::phase::ReshardPhase;
use crate::plan::{MigrationStep, ReshardPlan};
use crate::planner::{PlanRequest, Planner};
use crate::progress::ReshardProgress;
use crate::result::ReshardResult;
use crate::rollback::RollbackEngine;
use crate::state::{RangeMismatch, ReshardState};
use crate::store::{ClaimResult, StateStore};

/// Shared handle to an in-flight operation's state.
///
/// The mutex is held across the persist call so checkpoint writes reach the
/// store in the order they were taken.
type SharedState = Arc<Mutex<ReshardState>>;

/// The online resharding orchestrator.
///
/// Exposes the full operation surface: `plan`, `execute`, `resume`,
/// `rollback`, `progress`, `acknowledge`.
pub struct ReshardOrchestrator {
    store: Arc<dyn StateStore>,
    ops: Arc<dyn ShardOperations>,
    topology: Arc<dyn TopologyProvider>,
    planner: Planner,
    rollback: RollbackEngine,
    metrics: ReshardMetrics,
}

impl ReshardOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        ops: Arc<dyn ShardOperations>,
        topology: Arc<dyn TopologyProvider>,
    ) -> Self {
        let rollback = RollbackEngine::new(Arc::clone(&store), Arc::clone(&ops));
        Self {
            store,
            ops,
            topology,
            planner: Planner::new(),
            rollback,
            metrics: ReshardMetrics::new(),
        }
    }

    /// Replaces the default planner (e.g. to tune duration estimates).
    #[must_use]
    pub fn with_planner(mut self, planner: Planner) -> Self {
        self.planner = planner;
        self
    }

    /// Generates a plan from an explicit topology pair.
    ///
    /// # Errors
    ///
    /// See [`Planner::plan`].
    pub async fn plan(&self, request: PlanRequest) -> Result<ReshardPlan> {
        self.planner.plan(self.ops.as_ref(), request).await
    }

    /// Generates a plan migrating from the live topology to `new_topology`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PlanGenerationFailed`] if the live topology cannot
    /// be read; otherwise see [`Planner::plan`].
    pub async fn plan_against_live(
        &self,
        new_topology: ShardTopology,
        entity_kinds: Option<std::collections::BTreeSet<String>>,
    ) -> Result<ReshardPlan> {
        let old_topology =
            self.topology
                .current_topology()
                .await
                .map_err(|e| Error::PlanGenerationFailed {
                    message: format!("reading live topology: {e}"),
                })?;
        self.plan(PlanRequest {
            old_topology,
            new_topology,
            entity_kinds,
        })
        .await
    }

    /// Executes a plan to completion, failure, or cancellation.
    ///
    /// Returns `Ok` with a terminal [`ReshardResult`] for both completed and
    /// failed operations (failed results carry rollback metadata). Returns
    /// `Err` for admission rejection, state-store failure, and cooperative
    /// cancellation — cases where no terminal outcome was persisted.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyPlan`] if the plan has no steps
    /// - [`Error::ConcurrentReshardingNotAllowed`] if another operation is
    ///   active; nothing is written in that case
    /// - [`Error::StateStoreFailed`] if persistence fails mid-flight
    /// - [`Error::OperationCancelled`] if the cancellation token fires; the
    ///   persisted checkpoint stays consistent and the operation can be
    ///   resumed
    #[tracing::instrument(skip_all, fields(plan_id = %plan.id))]
    pub async fn execute(
        &self,
        plan: ReshardPlan,
        options: ExecuteOptions,
    ) -> Result<ReshardResult> {
        if plan.is_empty() {
            return Err(Error::EmptyPlan {
                message: "plan has no migration steps".into(),
            });
        }

        let state = ReshardState::admitted(plan);
        match self.store.try_claim_active(&state).await? {
            ClaimResult::Claimed => {}
            ClaimResult::ActiveExists { active } => {
                return Err(Error::ConcurrentReshardingNotAllowed { active });
            }
        }

        self.metrics.set_active_operations(1);
        info!(
            reshard_id = %state.id,
            steps = state.plan.len(),
            estimated_rows = state.plan.estimate.total_rows,
            "resharding admitted"
        );
        self.drive(state, options).await
    }

    /// Resumes a non-terminal operation from its persisted checkpoint.
    ///
    /// # Errors
    ///
    /// - [`Error::OperationNotFound`] if no such operation exists
    /// - [`Error::InvalidPhaseTransition`] if the operation is terminal
    /// - otherwise as [`Self::execute`]
    #[tracing::instrument(skip(self, options), fields(reshard_id = %id))]
    pub async fn resume(&self, id: ReshardId, options: ExecuteOptions) -> Result<ReshardResult> {
        let state = self
            .store
            .get(id)
            .await?
            .ok_or(Error::OperationNotFound { id })?;

        if state.is_terminal() {
            return Err(Error::InvalidPhaseTransition {
                from: state.current_phase,
                to: state.current_phase,
                reason: "terminal operation cannot resume".into(),
            });
        }

        info!(
            phase = %state.current_phase,
            rows_copied = state.total_rows_copied(),
            "resuming resharding from checkpoint"
        );
        self.drive(state, options).await
    }

    /// Rolls back a failed operation according to its metadata.
    ///
    /// # Errors
    ///
    /// See [`RollbackEngine::rollback`].
    pub async fn rollback(&self, result: &ReshardResult) -> Result<()> {
        self.rollback.rollback(result).await
    }

    /// Derives a point-in-time progress snapshot from persisted state.
    ///
    /// Pure read path: no side effects, never blocks on in-flight work, and
    /// remains available after failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationNotFound`] if no such operation exists.
    pub async fn progress(&self, id: ReshardId) -> Result<ReshardProgress> {
        let state = self
            .store
            .get(id)
            .await?
            .ok_or(Error::OperationNotFound { id })?;
        Ok(ReshardProgress::from_state(&state))
    }

    /// Lists all non-terminal operations — at most one under the admission
    /// invariant. Lets an operator discover an interrupted operation to
    /// resume or inspect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StateStoreFailed`] if the store cannot be read.
    pub async fn active_operations(&self) -> Result<Vec<ReshardState>> {
        self.store.list_active().await
    }

    /// Acknowledges a terminal result, deleting its state from the store.
    ///
    /// Only `Completed` and `RolledBack` operations can be acknowledged; a
    /// `Failed` operation with no rollback performed stays queryable so an
    /// operator can inspect and recover it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationNotFound`] for unknown IDs and
    /// [`Error::InvalidPhaseTransition`] for non-acknowledgeable phases.
    pub async fn acknowledge(&self, id: ReshardId) -> Result<()> {
        let state = self
            .store
            .get(id)
            .await?
            .ok_or(Error::OperationNotFound { id })?;

        match state.current_phase {
            ReshardPhase::Completed | ReshardPhase::RolledBack => self.store.delete(id).await,
            other => Err(Error::InvalidPhaseTransition {
                from: other,
                to: other,
                reason: "only completed or rolled-back operations can be acknowledged".into(),
            }),
        }
    }

    /// Drives the state machine from its current phase to a terminal
    /// outcome.
    async fn drive(&self, state: ReshardState, options: ExecuteOptions) -> Result<ReshardResult> {
        let state: SharedState = Arc::new(Mutex::new(state));

        loop {
            let (phase, id) = {
                let st = state.lock().await;
                (st.current_phase, st.id)
            };
            if phase == ReshardPhase::Completed {
                break;
            }

            // Cancellation is honored at phase boundaries, except once the
            // cutover is behind us — CleaningUp absorbs it internally.
            if options.cancellation.is_cancelled() && phase != ReshardPhase::CleaningUp {
                return Err(Error::OperationCancelled { id });
            }

            let phase_timer = Instant::now();
            let outcome = match phase {
                ReshardPhase::Copying => self.run_copying(&state, &options).await,
                ReshardPhase::Replicating => self.run_replicating(&state, &options).await,
                ReshardPhase::Verifying => self.run_verifying(&state, &options).await,
                ReshardPhase::CuttingOver => self.run_cutting_over(&state, &options).await,
                ReshardPhase::CleaningUp => self.run_cleaning_up(&state, &options).await,
                ReshardPhase::Planning
                | ReshardPhase::Completed
                | ReshardPhase::Failed
                | ReshardPhase::RolledBack => Err(Error::InvalidPhaseTransition {
                    from: phase,
                    to: phase,
                    reason: "not an executable phase".into(),
                }),
            };

            match outcome {
                Ok(()) => {
                    let (next, snapshot) = {
                        let mut st = state.lock().await;
                        st.complete_phase()?;
                        self.persist(&st).await?;
                        (st.current_phase, ReshardProgress::from_state(&st))
                    };
                    self.metrics
                        .record_phase_transition(&phase.to_string(), &next.to_string());
                    self.metrics
                        .observe_phase_duration(&phase.to_string(), phase_timer.elapsed());
                    info!(reshard_id = %id, from = %phase, to = %next, "phase completed");
                    if let Some(hook) = &options.on_phase_completed {
                        hook(phase, &snapshot);
                    }
                }
                Err(err) => return self.fail(&state, err).await,
            }
        }

        let st = state.lock().await;
        self.metrics.set_active_operations(0);
        info!(reshard_id = %st.id, "resharding completed");
        Ok(ReshardResult::from_state(&st))
    }

    /// Terminal failure handling: persist a `Failed` state with rollback
    /// metadata and return it as a result — except for errors where nothing
    /// durable should change (store failures, cancellation), which bubble.
    async fn fail(&self, state: &SharedState, err: Error) -> Result<ReshardResult> {
        match err {
            e @ (Error::StateStoreFailed { .. } | Error::OperationCancelled { .. }) => Err(e),
            err => {
                let mut st = state.lock().await;
                warn!(
                    reshard_id = %st.id,
                    phase = %st.current_phase,
                    error = %err,
                    "phase failed; recording terminal failure"
                );
                st.record_failure(&err)?;
                self.persist(&st).await?;
                self.metrics.set_active_operations(0);
                Ok(ReshardResult::from_state(&st))
            }
        }
    }

    async fn persist(&self, state: &ReshardState) -> Result<()> {
        self.store.save(state).await
    }

    /// Bulk copy: every step in parallel, batch by batch, checkpointing the
    /// returned cursor after each batch. A crash resumes from the last
    /// persisted cursor — at-least-once, never from zero.
    async fn run_copying(&self, state: &SharedState, options: &ExecuteOptions) -> Result<()> {
        let steps = { state.lock().await.plan.steps.clone() };
        let results = join_all(
            steps
                .iter()
                .map(|step| self.copy_step(state, step, options)),
        )
        .await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    async fn copy_step(
        &self,
        state: &SharedState,
        step: &MigrationStep,
        options: &ExecuteOptions,
    ) -> Result<()> {
        let step_id = step.id();
        let id = { state.lock().await.id };
        loop {
            if options.cancellation.is_cancelled() {
                return Err(Error::OperationCancelled { id });
            }

            let cursor = {
                let st = state.lock().await;
                st.checkpoint.copy_cursors.get(&step_id).cloned()
            };
            let batch = self
                .ops
                .copy_batch(
                    &step.source,
                    &step.target,
                    &step.range,
                    options.copy_batch_size,
                    cursor.as_ref(),
                )
                .await
                .map_err(|e| Error::CopyFailed {
                    step: step_id.clone(),
                    message: e.to_string(),
                })?;

            let rows = batch.rows_copied;
            {
                let mut st = state.lock().await;
                st.record_copy_batch(&step_id, rows, batch.next_cursor);
                self.persist(&st).await?;
            }
            self.metrics.add_rows_copied(rows);

            if !batch.has_more {
                return Ok(());
            }
        }
    }

    /// Incremental replication: poll change replay per step until reported
    /// lag drops below the configured threshold. Closes the gap between
    /// "copy snapshot taken" and "copy finished".
    async fn run_replicating(&self, state: &SharedState, options: &ExecuteOptions) -> Result<()> {
        let steps = { state.lock().await.plan.steps.clone() };
        let results = join_all(
            steps
                .iter()
                .map(|step| self.replicate_step(state, step, options)),
        )
        .await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    async fn replicate_step(
        &self,
        state: &SharedState,
        step: &MigrationStep,
        options: &ExecuteOptions,
    ) -> Result<()> {
        let step_id = step.id();
        let id = { state.lock().await.id };
        loop {
            if options.cancellation.is_cancelled() {
                return Err(Error::OperationCancelled { id });
            }

            let position = {
                let st = state.lock().await;
                st.checkpoint.cdc_positions.get(&step_id).cloned()
            };
            let batch = self
                .ops
                .replicate_changes(&step.source, &step.target, &step.range, position.as_ref())
                .await
                .map_err(|e| Error::ReplicationFailed {
                    step: step_id.clone(),
                    message: e.to_string(),
                })?;

            let rows = batch.rows_replicated;
            {
                let mut st = state.lock().await;
                st.record_replication(&step_id, rows, batch.new_position);
                self.persist(&st).await?;
            }
            self.metrics.add_rows_replicated(rows);

            if batch.lag <= options.cdc_lag_threshold {
                return Ok(());
            }
        }
    }

    /// Consistency verification: all steps in parallel under the configured
    /// mode. Any mismatch fails the phase with full details retained; there
    /// is no partial "mostly verified" success.
    async fn run_verifying(&self, state: &SharedState, options: &ExecuteOptions) -> Result<()> {
        let steps = { state.lock().await.plan.steps.clone() };
        let reports = join_all(steps.iter().map(|step| async move {
            let report = self
                .ops
                .verify_range(
                    &step.source,
                    &step.target,
                    &step.range,
                    options.verification_mode,
                )
                .await
                .map_err(|e| Error::VerificationFailed {
                    message: format!("verifying {}: {e}", step.id()),
                    mismatches: vec![],
                })?;
            Ok::<_, Error>((step, report))
        }))
        .await;

        let mut mismatches = Vec::new();
        for result in reports {
            let (step, report) = result?;
            if report.is_consistent {
                let mut st = state.lock().await;
                st.mark_verified(&step.id());
                self.persist(&st).await?;
            } else {
                mismatches.push(RangeMismatch {
                    step: step.id(),
                    source_count: report.source_count,
                    target_count: report.target_count,
                    detail: report.detail,
                });
            }
        }

        if !mismatches.is_empty() {
            return Err(Error::VerificationFailed {
                message: format!(
                    "{} of {} steps inconsistent",
                    mismatches.len(),
                    steps.len()
                ),
                mismatches,
            });
        }
        Ok(())
    }

    /// Cutover: the only phase with an externally-visible window. The gate
    /// predicate and the swap timeout both abort without touching the live
    /// topology — the swap is all-or-nothing by collaborator contract.
    async fn run_cutting_over(&self, state: &SharedState, options: &ExecuteOptions) -> Result<()> {
        let plan = { state.lock().await.plan.clone() };

        // Replication lag must still be inside the threshold; a regression
        // here means the Replicating exit condition no longer holds.
        for source in plan.source_shards() {
            let lag = self
                .ops
                .replication_lag(source)
                .await
                .map_err(|e| Error::CutoverFailed {
                    message: format!("lag check on {source}: {e}"),
                })?;
            if lag > options.cdc_lag_threshold {
                self.metrics.record_cutover("failed");
                return Err(Error::CutoverFailed {
                    message: format!(
                        "replication lag on {source} regressed to {}ms",
                        lag.as_millis()
                    ),
                });
            }
        }

        if let Some(gate) = &options.on_cutover_starting {
            if !gate(&plan) {
                self.metrics.record_cutover("aborted");
                return Err(Error::CutoverAborted);
            }
        }

        info!(plan_id = %plan.id, new_version = plan.new_topology.version(), "starting topology swap");
        match tokio::time::timeout(
            options.cutover_timeout,
            self.ops.swap_topology(&plan.new_topology),
        )
        .await
        {
            Err(_elapsed) => {
                self.metrics.record_cutover("timeout");
                Err(Error::CutoverTimeout {
                    timeout_ms: u64::try_from(options.cutover_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                })
            }
            Ok(Err(e)) => {
                self.metrics.record_cutover("failed");
                Err(Error::CutoverFailed {
                    message: e.to_string(),
                })
            }
            Ok(Ok(())) => {
                {
                    let mut st = state.lock().await;
                    st.set_cutover_at(Utc::now());
                    self.persist(&st).await?;
                }
                self.metrics.record_cutover("completed");
                Ok(())
            }
        }
    }

    /// Source cleanup: waits out the retention window, then deletes migrated
    /// ranges from the old assignment. Failures (and cancellation) here are
    /// recorded but never fail the operation — the topology switch, the only
    /// irreversible user-visible step, already succeeded.
    async fn run_cleaning_up(&self, state: &SharedState, options: &ExecuteOptions) -> Result<()> {
        if let Err(err) = self.cleanup_inner(state, options).await {
            if matches!(err, Error::StateStoreFailed { .. }) {
                return Err(err);
            }
            warn!(error = %err, "cleanup failed; operation completes regardless");
            self.metrics.record_cleanup_failure();
            let mut st = state.lock().await;
            st.record_cleanup_failure(&err);
            self.persist(&st).await?;
        }
        Ok(())
    }

    async fn cleanup_inner(&self, state: &SharedState, options: &ExecuteOptions) -> Result<()> {
        let (plan, cutover_at, id) = {
            let st = state.lock().await;
            (st.plan.clone(), st.cutover_at, st.id)
        };

        // Retention window: the rollback safety margin between cutover and
        // deleting the only other copy of the data.
        if let Some(cutover_at) = cutover_at {
            let elapsed = (Utc::now() - cutover_at).to_std().unwrap_or_default();
            if elapsed < options.cleanup_retention_period {
                let wait = options.cleanup_retention_period - elapsed;
                tokio::select! {
                    () = tokio::time::sleep(wait) => {}
                    () = options.cancellation.cancelled() => {
                        return Err(Error::OperationCancelled { id });
                    }
                }
            }
        }

        let results = join_all(
            plan.steps
                .iter()
                .map(|step| self.purge_source_step(id, step, options)),
        )
        .await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    async fn purge_source_step(
        &self,
        id: ReshardId,
        step: &MigrationStep,
        options: &ExecuteOptions,
    ) -> Result<()> {
        loop {
            if options.cancellation.is_cancelled() {
                return Err(Error::OperationCancelled { id });
            }
            let deleted = self
                .ops
                .cleanup_range(&step.source, &step.range, options.copy_batch_size)
                .await
                .map_err(|e| Error::CleanupFailed {
                    shard: step.source.clone(),
                    message: e.to_string(),
                })?;
            self.metrics.add_rows_cleaned(deleted);
            if deleted == 0 {
                return Ok(());
            }
        }
    }
}

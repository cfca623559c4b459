//! Shared test fixtures: an in-memory mock shard backend and a
//! write-counting state store wrapper.

// each test binary uses a different subset of these fixtures
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use reshard_core::{KeyRange, ReshardId, ShardId, ShardTopology};
use reshard_flow::error::Result;
use reshard_flow::ops::{
    BatchCursor, CdcPosition, CopyBatch, OpsError, OpsResult, RangeEstimate, RangeVerification,
    ReplicationBatch, ShardOperations, TopologyProvider, VerificationMode,
};
use reshard_flow::state::ReshardState;
use reshard_flow::store::memory::InMemoryStateStore;
use reshard_flow::store::{ClaimResult, StateStore};

/// Bytes-per-row assumption used by the mock estimator.
const MOCK_ROW_BYTES: u64 = 100;

/// Changes drained per replication poll.
const REPLICATION_POLL_LIMIT: usize = 25;

/// Lag reported while a source still has pending changes.
const PENDING_LAG: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct BackendState {
    /// Row keys per shard.
    rows: HashMap<ShardId, BTreeSet<u64>>,
    /// Pending change-stream keys per source shard.
    backlog: HashMap<ShardId, VecDeque<u64>>,
    /// The live topology.
    topology: Option<ShardTopology>,
    /// Total changes drained per source, for position strings.
    drained: HashMap<ShardId, u64>,
}

/// In-memory shard backend with fault injection, standing in for the real
/// per-shard data plane.
pub struct MockShardBackend {
    state: Mutex<BackendState>,
    copy_batches: AtomicUsize,
    swap_calls: AtomicUsize,
    fail_estimate: AtomicBool,
    fail_verify: AtomicBool,
    fail_cleanup: AtomicBool,
    /// Cancel this token once the given number of copy batches completed.
    cancel_after_copy_batches: Mutex<Option<(usize, CancellationToken)>>,
    /// Artificial delay injected into the topology swap.
    swap_delay: Mutex<Option<Duration>>,
}

impl MockShardBackend {
    pub fn new(topology: ShardTopology) -> Self {
        Self {
            state: Mutex::new(BackendState {
                topology: Some(topology),
                ..BackendState::default()
            }),
            copy_batches: AtomicUsize::new(0),
            swap_calls: AtomicUsize::new(0),
            fail_estimate: AtomicBool::new(false),
            fail_verify: AtomicBool::new(false),
            fail_cleanup: AtomicBool::new(false),
            cancel_after_copy_batches: Mutex::new(None),
            swap_delay: Mutex::new(None),
        }
    }

    /// Seeds row keys on a shard.
    pub fn seed(&self, shard: impl Into<ShardId>, keys: impl IntoIterator<Item = u64>) {
        let mut state = self.state.lock().unwrap();
        state.rows.entry(shard.into()).or_default().extend(keys);
    }

    /// Applies post-snapshot changes on a source shard: the keys land on the
    /// shard immediately and queue up for change-stream replay.
    pub fn push_changes(&self, shard: impl Into<ShardId>, keys: impl IntoIterator<Item = u64>) {
        let shard = shard.into();
        let mut state = self.state.lock().unwrap();
        for key in keys {
            state.rows.entry(shard.clone()).or_default().insert(key);
            state.backlog.entry(shard.clone()).or_default().push_back(key);
        }
    }

    /// Counts rows on a shard inside a range.
    pub fn rows_in(&self, shard: &ShardId, range: &KeyRange) -> u64 {
        let state = self.state.lock().unwrap();
        state.rows.get(shard).map_or(0, |keys| {
            keys.iter().filter(|k| range.contains(**k)).count() as u64
        })
    }

    pub fn topology_version(&self) -> u64 {
        let state = self.state.lock().unwrap();
        state.topology.as_ref().map_or(0, ShardTopology::version)
    }

    pub fn copy_batch_calls(&self) -> usize {
        self.copy_batches.load(Ordering::SeqCst)
    }

    pub fn swap_calls(&self) -> usize {
        self.swap_calls.load(Ordering::SeqCst)
    }

    pub fn fail_estimates(&self) {
        self.fail_estimate.store(true, Ordering::SeqCst);
    }

    pub fn fail_verification(&self) {
        self.fail_verify.store(true, Ordering::SeqCst);
    }

    pub fn fail_cleanup(&self) {
        self.fail_cleanup.store(true, Ordering::SeqCst);
    }

    /// Cancels `token` once `batches` copy batches have completed.
    pub fn cancel_after_copy_batches(&self, batches: usize, token: CancellationToken) {
        *self.cancel_after_copy_batches.lock().unwrap() = Some((batches, token));
    }

    /// Delays every topology swap by `delay`.
    pub fn delay_swaps(&self, delay: Duration) {
        *self.swap_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl ShardOperations for MockShardBackend {
    async fn estimate_range(
        &self,
        shard: &ShardId,
        range: &KeyRange,
    ) -> OpsResult<RangeEstimate> {
        if self.fail_estimate.load(Ordering::SeqCst) {
            return Err(OpsError::new("estimation backend unavailable"));
        }
        let rows = self.rows_in(shard, range);
        Ok(RangeEstimate {
            rows,
            bytes: rows * MOCK_ROW_BYTES,
        })
    }

    async fn copy_batch(
        &self,
        source: &ShardId,
        target: &ShardId,
        range: &KeyRange,
        batch_size: u32,
        cursor: Option<&BatchCursor>,
    ) -> OpsResult<CopyBatch> {
        let after: Option<u64> = cursor.and_then(|c| c.as_str().parse().ok());

        let (taken, has_more) = {
            let mut state = self.state.lock().unwrap();
            let pending: Vec<u64> = state.rows.get(source).map_or_else(Vec::new, |keys| {
                keys.iter()
                    .copied()
                    .filter(|k| range.contains(*k) && after.map_or(true, |a| *k > a))
                    .collect()
            });
            let taken: Vec<u64> = pending.iter().copied().take(batch_size as usize).collect();
            let has_more = pending.len() > taken.len();
            state.rows.entry(target.clone()).or_default().extend(&taken);
            (taken, has_more)
        };

        let next_cursor = taken.last().map_or_else(
            || cursor.cloned().unwrap_or_else(|| BatchCursor::new("")),
            |last| BatchCursor::new(last.to_string()),
        );

        let completed = self.copy_batches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((batches, token)) = self.cancel_after_copy_batches.lock().unwrap().as_ref() {
            if completed >= *batches {
                token.cancel();
            }
        }

        Ok(CopyBatch {
            rows_copied: taken.len() as u64,
            next_cursor,
            has_more,
        })
    }

    async fn replicate_changes(
        &self,
        source: &ShardId,
        target: &ShardId,
        range: &KeyRange,
        _position: Option<&CdcPosition>,
    ) -> OpsResult<ReplicationBatch> {
        let mut state = self.state.lock().unwrap();

        let mut applied = 0u64;
        if let Some(queue) = state.backlog.get_mut(source) {
            let mut kept = VecDeque::with_capacity(queue.len());
            while let Some(key) = queue.pop_front() {
                if range.contains(key) && (applied as usize) < REPLICATION_POLL_LIMIT {
                    applied += 1;
                } else {
                    kept.push_back(key);
                }
            }
            *queue = kept;
        }
        // applied keys are already on the source; mirror them to the target
        let replayed: Vec<u64> = state
            .rows
            .get(source)
            .map_or_else(Vec::new, |keys| {
                keys.iter().copied().filter(|k| range.contains(*k)).collect()
            });
        state.rows.entry(target.clone()).or_default().extend(replayed);

        let total = state.drained.entry(source.clone()).or_default();
        *total += applied;
        let position = CdcPosition::new(format!("pos:{total}"));

        let remaining_in_range = state.backlog.get(source).map_or(0, |queue| {
            queue.iter().filter(|k| range.contains(**k)).count()
        });

        Ok(ReplicationBatch {
            rows_replicated: applied,
            new_position: position,
            lag: if remaining_in_range > 0 {
                PENDING_LAG
            } else {
                Duration::ZERO
            },
        })
    }

    async fn replication_lag(&self, source: &ShardId) -> OpsResult<Duration> {
        let state = self.state.lock().unwrap();
        let pending = state.backlog.get(source).map_or(0, VecDeque::len);
        Ok(if pending > 0 {
            PENDING_LAG
        } else {
            Duration::ZERO
        })
    }

    async fn verify_range(
        &self,
        source: &ShardId,
        target: &ShardId,
        range: &KeyRange,
        _mode: VerificationMode,
    ) -> OpsResult<RangeVerification> {
        let source_count = self.rows_in(source, range);
        let target_count = self.rows_in(target, range);
        if self.fail_verify.load(Ordering::SeqCst) {
            return Ok(RangeVerification {
                is_consistent: false,
                source_count,
                target_count,
                detail: Some("forced mismatch".into()),
            });
        }
        Ok(RangeVerification {
            is_consistent: source_count == target_count,
            source_count,
            target_count,
            detail: None,
        })
    }

    async fn swap_topology(&self, topology: &ShardTopology) -> OpsResult<()> {
        let delay = *self.swap_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.topology = Some(topology.clone());
        drop(state);
        self.swap_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup_range(
        &self,
        shard: &ShardId,
        range: &KeyRange,
        batch_size: u32,
    ) -> OpsResult<u64> {
        if self.fail_cleanup.load(Ordering::SeqCst) {
            return Err(OpsError::new("cleanup backend unavailable"));
        }
        let mut state = self.state.lock().unwrap();
        let Some(keys) = state.rows.get_mut(shard) else {
            return Ok(0);
        };
        let doomed: Vec<u64> = keys
            .iter()
            .copied()
            .filter(|k| range.contains(*k))
            .take(batch_size as usize)
            .collect();
        for key in &doomed {
            keys.remove(key);
        }
        Ok(doomed.len() as u64)
    }
}

#[async_trait]
impl TopologyProvider for MockShardBackend {
    async fn current_topology(&self) -> OpsResult<ShardTopology> {
        let state = self.state.lock().unwrap();
        state
            .topology
            .clone()
            .ok_or_else(|| OpsError::new("no topology registered"))
    }
}

/// State store wrapper that counts persisted writes.
#[derive(Default)]
pub struct CountingStore {
    inner: InMemoryStateStore,
    writes: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes that actually persisted something (saves, deletes,
    /// and winning claims; a losing claim writes nothing).
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for CountingStore {
    async fn save(&self, state: &ReshardState) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.save(state).await
    }

    async fn get(&self, id: ReshardId) -> Result<Option<ReshardState>> {
        self.inner.get(id).await
    }

    async fn list_active(&self) -> Result<Vec<ReshardState>> {
        self.inner.list_active().await
    }

    async fn delete(&self, id: ReshardId) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(id).await
    }

    async fn try_claim_active(&self, state: &ReshardState) -> Result<ClaimResult> {
        let claim = self.inner.try_claim_active(state).await?;
        if claim.is_claimed() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(claim)
    }
}

//! # reshard-flow
//!
//! Online resharding orchestrator: migrates data between two shard
//! topologies while the system keeps serving traffic, with checkpoint-based
//! crash recovery and rollback.
//!
//! ## Core Concepts
//!
//! - **Plan**: the immutable output of diffing two topologies — exactly
//!   which key ranges move between which shards, with size estimates
//! - **Phases**: Planning → Copying → Replicating → Verifying →
//!   CuttingOver → CleaningUp → Completed, in strict forward order;
//!   `Failed` and `RolledBack` are terminal absorbing states
//! - **Checkpoint**: durable per-step resume markers persisted after every
//!   batch, so a crash re-does at most one batch per step
//!
//! ## Guarantees
//!
//! - **One active operation**: admission is a store-level conditional
//!   insert; two orchestrators cannot both win
//! - **At-least-once copy**: reconciled by the Verifying phase, never by
//!   assuming exactly-once
//! - **Bounded blast radius**: the only externally visible window is the
//!   atomic topology swap, which is gated, timed out, and all-or-nothing
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use reshard_flow::executor::ReshardOrchestrator;
//! use reshard_flow::options::ExecuteOptions;
//! use reshard_flow::planner::PlanRequest;
//! use reshard_flow::store::memory::InMemoryStateStore;
//!
//! # async fn run(ops: Arc<dyn reshard_flow::ops::ShardOperations>,
//! #              provider: Arc<dyn reshard_flow::ops::TopologyProvider>,
//! #              request: PlanRequest) -> reshard_flow::error::Result<()> {
//! let store = Arc::new(InMemoryStateStore::new());
//! let orchestrator = ReshardOrchestrator::new(store, ops, provider);
//!
//! let plan = orchestrator.plan(request).await?;
//! let result = orchestrator.execute(plan, ExecuteOptions::default()).await?;
//! if !result.is_success() {
//!     orchestrator.rollback(&result).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod executor;
pub mod metrics;
pub mod ops;
pub mod options;
pub mod phase;
pub mod plan;
pub mod planner;
pub mod progress;
pub mod result;
pub mod rollback;
pub mod state;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::executor::ReshardOrchestrator;
    pub use crate::metrics::ReshardMetrics;
    pub use crate::ops::{
        BatchCursor, CdcPosition, CopyBatch, OpsError, RangeEstimate, RangeVerification,
        ReplicationBatch, ShardOperations, TopologyProvider, VerificationMode,
    };
    pub use crate::options::ExecuteOptions;
    pub use crate::phase::{PhaseHistoryEntry, ReshardPhase};
    pub use crate::plan::{MigrationStep, PlanEstimate, ReshardPlan};
    pub use crate::planner::{PlanRequest, Planner};
    pub use crate::progress::ReshardProgress;
    pub use crate::result::{ReshardResult, RollbackMetadata};
    pub use crate::rollback::RollbackEngine;
    pub use crate::state::{ReshardCheckpoint, ReshardState, StepProgress};
    pub use crate::store::{memory::InMemoryStateStore, ClaimResult, StateStore};
    pub use reshard_core::{KeyRange, PlanId, ReshardId, ShardAssignment, ShardId, ShardTopology};
}

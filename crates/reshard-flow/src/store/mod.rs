//! Pluggable durable storage for resharding state.
//!
//! The [`StateStore`] trait defines the persistence layer the orchestrator
//! checkpoints through. Production implementations must be durable across
//! process restarts — crash recovery is meaningless otherwise.
//!
//! ## Design Principles
//!
//! - **Conditional insert for admission**: the one-active-operation
//!   invariant is enforced *by the store*, not by an in-memory flag, so it
//!   holds across restarts and multiple orchestrator instances
//! - **Full-state saves**: the orchestrator is the single writer for an
//!   operation; saves replace the whole state
//! - **Testability**: an in-memory implementation ships for tests and
//!   development

pub mod memory;

use async_trait::async_trait;

use reshard_core::ReshardId;

use crate::error::Result;
use crate::state::ReshardState;

/// Result of an admission attempt via conditional insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    /// The state was inserted; this operation now holds the active slot.
    Claimed,
    /// Another non-terminal operation holds the active slot. Nothing was
    /// written.
    ActiveExists {
        /// The operation currently active.
        active: ReshardId,
    },
}

impl ClaimResult {
    /// Returns true if the claim succeeded.
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed)
    }
}

/// Durable persistence for orchestration state.
///
/// All methods are fallible; implementations surface their own failures as
/// [`crate::error::Error::StateStoreFailed`]. All methods are `Send + Sync`
/// for concurrent access from per-step tasks.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persists `state`, replacing any previous version.
    async fn save(&self, state: &ReshardState) -> Result<()>;

    /// Fetches the state for an operation, or `None` if it does not exist.
    async fn get(&self, id: ReshardId) -> Result<Option<ReshardState>>;

    /// Lists all non-terminal operations.
    async fn list_active(&self) -> Result<Vec<ReshardState>>;

    /// Deletes an operation's state.
    async fn delete(&self, id: ReshardId) -> Result<()>;

    /// Atomically inserts `state` if and only if no non-terminal operation
    /// exists.
    ///
    /// This is the admission primitive for the one-active-operation
    /// invariant: check and insert happen under one store-level guard, so
    /// two racing orchestrators cannot both be admitted. A losing claim
    /// must not write anything.
    async fn try_claim_active(&self, state: &ReshardState) -> Result<ClaimResult>;
}

//! In-memory state store for testing and development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no durability, no cross-process
//!   coordination
//! - **Single-process only**: crash recovery works only across logical
//!   restarts within one process (e.g. in tests)

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use reshard_core::ReshardId;

use super::{ClaimResult, StateStore};
use crate::error::{Error, Result};
use crate::state::ReshardState;

/// In-memory implementation of [`StateStore`], synchronized with an
/// `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<ReshardId, ReshardState>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::state_store("lock poisoned")
}

impl InMemoryStateStore {
    /// Creates a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of states currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn state_count(&self) -> Result<usize> {
        let count = {
            let states = self.states.read().map_err(poison_err)?;
            states.len()
        };
        Ok(count)
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, state: &ReshardState) -> Result<()> {
        {
            let mut states = self.states.write().map_err(poison_err)?;
            states.insert(state.id, state.clone());
        }
        Ok(())
    }

    async fn get(&self, id: ReshardId) -> Result<Option<ReshardState>> {
        let result = {
            let states = self.states.read().map_err(poison_err)?;
            states.get(&id).cloned()
        };
        Ok(result)
    }

    async fn list_active(&self) -> Result<Vec<ReshardState>> {
        let result = {
            let states = self.states.read().map_err(poison_err)?;
            let mut active: Vec<_> = states
                .values()
                .filter(|s| !s.is_terminal())
                .cloned()
                .collect();
            active.sort_by_key(|s| s.id);
            active
        };
        Ok(result)
    }

    async fn delete(&self, id: ReshardId) -> Result<()> {
        {
            let mut states = self.states.write().map_err(poison_err)?;
            states.remove(&id);
        }
        Ok(())
    }

    async fn try_claim_active(&self, state: &ReshardState) -> Result<ClaimResult> {
        let mut states = self.states.write().map_err(poison_err)?;

        if let Some(active) = states.values().find(|s| !s.is_terminal()) {
            let active = active.id;
            drop(states);
            return Ok(ClaimResult::ActiveExists { active });
        }

        states.insert(state.id, state.clone());
        drop(states);
        Ok(ClaimResult::Claimed)
    }
}

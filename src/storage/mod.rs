//! SQLite storage layer for callsync.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode for concurrent reads
//! - Transaction discipline for atomic writes
//! - Audit events for every sync status transition
//!
//! # Submodules
//!
//! - [`events`] - Audit event storage
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Main SQLite storage implementation

pub mod events;
pub mod schema;
pub mod sqlite;

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

pub use sqlite::{
    Acknowledgement, CallAnnotation, MutationContext, PatchOutcome, PendingCalls, PersonEdit,
    SqliteStorage, SyncSummary,
};

/// Store handle shared by the engines and the scheduler.
///
/// Every access is a short synchronous critical section; the lock is
/// never held across an `.await`.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<SqliteStorage>>,
}

impl SharedStore {
    #[must_use]
    pub fn new(storage: SqliteStorage) -> Self {
        Self {
            inner: Arc::new(Mutex::new(storage)),
        }
    }

    /// Run `f` with exclusive access to the store.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or `Other` if a previous holder panicked.
    pub fn with<R>(&self, f: impl FnOnce(&mut SqliteStorage) -> Result<R>) -> Result<R> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| Error::Other("store lock poisoned".to_string()))?;
        f(&mut guard)
    }
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore").finish_non_exhaustive()
    }
}

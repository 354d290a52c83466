//! Collaborator contracts for the decrement operation and its exclusion
//! strategies.
//!
//! The core depends only on these traits, never on a concrete storage
//! engine or lock service. Deterministic in-memory implementations for
//! testing live in [`inmemory`].

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Stock, StockId};

pub mod inmemory;
pub use inmemory::{
    DeterministicAdvisoryLocks, DeterministicLockStateStore, DeterministicStockStore,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("stock {id} not found")]
    NotFound { id: StockId },
    #[error("row lock wait exceeded {duration_ms}ms")]
    LockWaitTimeout { duration_ms: u64 },
    #[error("transaction aborted by deadlock: {reason}")]
    Deadlock { reason: String },
    #[error("compare-and-swap on '{key}' failed")]
    CasFailed {
        key: String,
        /// Value observed at swap time; `None` when the key was absent.
        actual: Option<String>,
    },
    #[error("operation failed: {reason}")]
    Failed { reason: String },
}

/// Persistence surface for stock records.
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn fetch(&self, id: StockId) -> Result<Stock, StoreError>;
    async fn save(&self, stock: &Stock) -> Result<(), StoreError>;
}

/// A data transaction holding zero or more exclusive row locks.
///
/// Row locks are released only when the transaction ends: commit,
/// rollback, or drop. Dropping an uncommitted transaction rolls it back.
#[async_trait]
pub trait StockTransaction: Send {
    /// Fetch the row under an exclusive lock, blocking until the lock is
    /// granted or the store's lock-wait bound elapses
    /// ([`StoreError::LockWaitTimeout`]).
    async fn fetch_for_update(&mut self, id: StockId) -> Result<Stock, StoreError>;

    /// Stage a write; it becomes visible to other transactions at commit.
    async fn save(&mut self, stock: &Stock) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// A stock store that can serialize conflicting writers itself via
/// exclusive row locks.
#[async_trait]
pub trait TransactionalStockStore: StockStore {
    async fn begin(&self) -> Result<Box<dyn StockTransaction>, StoreError>;
}

/// Key-scoped advisory locks provided by the storage backend, independent
/// of any specific row.
///
/// The lock is scoped to the acquiring session, not to any data
/// transaction; releasing a key that is not held is a no-op.
#[async_trait]
pub trait AdvisoryLockService: Send + Sync {
    /// Bounded wait for the named lock. `Ok(true)` means granted,
    /// `Ok(false)` means the wait elapsed without a grant.
    async fn acquire(&self, key: &str, timeout: Duration) -> Result<bool, StoreError>;

    /// Release a previously acquired lock. `Ok(false)` means the key was
    /// not held; that is a no-op, not an error.
    async fn release(&self, key: &str) -> Result<bool, StoreError>;
}

/// Minimal surface the lease client needs from the external coordination
/// service: read a key and publish lease state via compare-and-swap.
#[async_trait]
pub trait LockStateStore: Send + Sync {
    /// `Ok(None)` when the key has never been written.
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically replace the value if it currently equals `expected`
    /// (`None` = key absent). Fails with [`StoreError::CasFailed`]
    /// carrying the observed value otherwise.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<String>,
        new_value: String,
    ) -> Result<(), StoreError>;
}

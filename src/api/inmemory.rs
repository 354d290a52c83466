//! In-memory implementations of the collaborator traits for testing.
//!
//! Deterministic, non-persistent implementations of every collaborator
//! contract, for unit tests and simulation testing. They mirror the
//! observable behavior of production backends without network or disk I/O:
//! exclusive row locks with a bounded lock wait, session-scoped advisory
//! locks, and a compare-and-swap key-value store for lease state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

use super::{
    AdvisoryLockService, LockStateStore, StockStore, StockTransaction, StoreError,
    TransactionalStockStore,
};
use crate::domain::{Stock, StockId};

/// Default bound on how long `fetch_for_update` waits for a row lock,
/// matching the conventional storage-engine default.
const DEFAULT_ROW_LOCK_WAIT: Duration = Duration::from_secs(3);

/// In-memory stock store with exclusive per-row locks.
///
/// Counts `fetch`/`save`/`begin` calls so tests can assert that an
/// operation never reached the store. An optional simulated latency widens
/// the read-to-write race window for tests that demonstrate unprotected
/// interleavings.
#[derive(Clone)]
pub struct DeterministicStockStore {
    rows: Arc<Mutex<HashMap<StockId, Stock>>>,
    row_locks: Arc<Mutex<HashMap<StockId, Arc<Mutex<()>>>>>,
    fetches: Arc<AtomicU64>,
    saves: Arc<AtomicU64>,
    begins: Arc<AtomicU64>,
    latency: Option<Duration>,
    row_lock_wait: Duration,
}

impl Default for DeterministicStockStore {
    fn default() -> Self {
        Self {
            rows: Arc::default(),
            row_locks: Arc::default(),
            fetches: Arc::default(),
            saves: Arc::default(),
            begins: Arc::default(),
            latency: None,
            row_lock_wait: DEFAULT_ROW_LOCK_WAIT,
        }
    }
}

impl DeterministicStockStore {
    /// Create an empty in-memory store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a store that sleeps `latency` inside every fetch and save,
    /// widening the window between a read and its dependent write.
    pub fn with_simulated_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency: Some(latency),
            ..Self::default()
        })
    }

    /// Create a store with a custom row-lock wait bound.
    pub fn with_row_lock_wait(row_lock_wait: Duration) -> Arc<Self> {
        Arc::new(Self {
            row_lock_wait,
            ..Self::default()
        })
    }

    /// Seed a row directly, bypassing the `save` counter.
    pub async fn insert(&self, stock: Stock) {
        self.rows.lock().await.insert(stock.id(), stock);
    }

    /// Number of `fetch`/`fetch_for_update` calls issued against the store.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of `save` calls issued against the store.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Number of transactions begun against the store.
    pub fn begin_count(&self) -> u64 {
        self.begins.load(Ordering::Relaxed)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl StockStore for DeterministicStockStore {
    async fn fetch(&self, id: StockId) -> Result<Stock, StoreError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.pause().await;
        self.rows
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    async fn save(&self, stock: &Stock) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.pause().await;
        self.rows.lock().await.insert(stock.id(), stock.clone());
        Ok(())
    }
}

#[async_trait]
impl TransactionalStockStore for DeterministicStockStore {
    async fn begin(&self) -> Result<Box<dyn StockTransaction>, StoreError> {
        self.begins.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(DeterministicTransaction {
            rows: Arc::clone(&self.rows),
            row_locks: Arc::clone(&self.row_locks),
            fetches: Arc::clone(&self.fetches),
            saves: Arc::clone(&self.saves),
            latency: self.latency,
            row_lock_wait: self.row_lock_wait,
            guards: HashMap::new(),
            staged: HashMap::new(),
        }))
    }
}

/// A transaction over [`DeterministicStockStore`].
///
/// Row locks acquired by `fetch_for_update` are held until the transaction
/// ends; writes are staged and become visible at commit. Dropping the
/// transaction without committing discards the staged writes and releases
/// the locks.
struct DeterministicTransaction {
    rows: Arc<Mutex<HashMap<StockId, Stock>>>,
    row_locks: Arc<Mutex<HashMap<StockId, Arc<Mutex<()>>>>>,
    fetches: Arc<AtomicU64>,
    saves: Arc<AtomicU64>,
    latency: Option<Duration>,
    row_lock_wait: Duration,
    guards: HashMap<StockId, OwnedMutexGuard<()>>,
    staged: HashMap<StockId, Stock>,
}

impl DeterministicTransaction {
    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl StockTransaction for DeterministicTransaction {
    async fn fetch_for_update(&mut self, id: StockId) -> Result<Stock, StoreError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        if let Some(staged) = self.staged.get(&id) {
            return Ok(staged.clone());
        }

        // A row locked earlier in this transaction must not be re-locked.
        if !self.guards.contains_key(&id) {
            let lock = {
                let mut locks = self.row_locks.lock().await;
                Arc::clone(locks.entry(id).or_default())
            };
            match timeout(self.row_lock_wait, lock.lock_owned()).await {
                Ok(guard) => {
                    self.guards.insert(id, guard);
                }
                Err(_) => {
                    return Err(StoreError::LockWaitTimeout {
                        duration_ms: self.row_lock_wait.as_millis() as u64,
                    });
                }
            }
        }

        self.pause().await;
        self.rows
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    async fn save(&mut self, stock: &Stock) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.pause().await;
        self.staged.insert(stock.id(), stock.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        {
            let mut rows = this.rows.lock().await;
            for (id, stock) in this.staged {
                rows.insert(id, stock);
            }
        }
        // Row locks release when the guards drop here.
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Staged writes and row locks are discarded with `self`.
        Ok(())
    }
}

/// In-memory advisory lock service.
///
/// Emulates the named-lock facility of a database server: a bounded wait
/// to acquire a key-scoped lock, and a release that is a no-op when the
/// key is not held.
#[derive(Clone, Default)]
pub struct DeterministicAdvisoryLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    held: Arc<Mutex<HashMap<String, OwnedMutexGuard<()>>>>,
}

impl DeterministicAdvisoryLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl AdvisoryLockService for DeterministicAdvisoryLocks {
    async fn acquire(&self, key: &str, wait: Duration) -> Result<bool, StoreError> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        match timeout(wait, lock.lock_owned()).await {
            Ok(guard) => {
                self.held.lock().await.insert(key.to_string(), guard);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn release(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.held.lock().await.remove(key).is_some())
    }
}

/// In-memory compare-and-swap key-value store for lease state.
#[derive(Clone, Default)]
pub struct DeterministicLockStateStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl DeterministicLockStateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl LockStateStore for DeterministicLockStateStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().await.get(key).cloned())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<String>,
        new_value: String,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let current = inner.get(key).cloned();
        let condition_matches = match (&expected, &current) {
            (None, None) => true,
            (Some(exp), Some(cur)) => exp == cur,
            _ => false,
        };
        if condition_matches {
            inner.insert(key.to_string(), new_value);
            Ok(())
        } else {
            Err(StoreError::CasFailed {
                key: key.to_string(),
                actual: current,
            })
        }
    }
}

//! Advisory (named) locking: a key-scoped lock taken from the storage
//! backend before the decrement, released explicitly afterwards.
//!
//! The advisory session and the data transaction are deliberately
//! separate scopes. The advisory lock is scoped to the acquiring session,
//! so it must outlast and stay independent of the transaction that
//! performs the write; coupling the two deadlocks backends that run the
//! lock call inside the data transaction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::{AdvisoryLockService, StockStore};
use crate::coordination::error::{DecrementError, LockTimeoutSnafu};
use crate::coordination::types::lock_key;
use crate::coordination::DecrementStrategy;
use crate::domain::{StockId, StockService};

/// Configuration for advisory lock acquisition.
#[derive(Debug, Clone)]
pub struct NamedLockConfig {
    /// Bounded wait for the named lock before giving up.
    pub acquire_timeout: Duration,
}

impl Default for NamedLockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(3),
        }
    }
}

/// A held advisory lock, released on every exit path.
///
/// Explicit release happens on the ordinary paths; if the session is
/// dropped without release (a panicking caller), a best-effort release is
/// spawned so the key does not stay locked for the rest of the backend
/// session.
struct AdvisorySession<L: AdvisoryLockService + ?Sized + 'static> {
    locks: Arc<L>,
    key: String,
    released: bool,
}

impl<L: AdvisoryLockService + ?Sized + 'static> AdvisorySession<L> {
    fn new(locks: Arc<L>, key: String) -> Self {
        Self {
            locks,
            key,
            released: false,
        }
    }

    /// Release the lock, tolerating every failure: a key that is not held
    /// releases as a no-op, and a backend error is logged, never surfaced.
    async fn release(mut self) {
        self.released = true;
        match self.locks.release(&self.key).await {
            Ok(true) => debug!(key = %self.key, "advisory lock released"),
            Ok(false) => debug!(key = %self.key, "advisory lock was not held at release"),
            Err(error) => warn!(key = %self.key, %error, "advisory lock release failed"),
        }
    }
}

impl<L: AdvisoryLockService + ?Sized + 'static> Drop for AdvisorySession<L> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let locks = Arc::clone(&self.locks);
        let key = std::mem::take(&mut self.key);
        tokio::spawn(async move {
            match locks.release(&key).await {
                Ok(_) => debug!(key = %key, "advisory lock released on drop"),
                Err(error) => warn!(key = %key, %error, "advisory lock release on drop failed"),
            }
        });
    }
}

/// Named-lock strategy: advisory lock around a decrement that runs in its
/// own, independent transaction.
pub struct NamedLockStrategy<L, S>
where
    L: AdvisoryLockService + ?Sized + 'static,
    S: StockStore + ?Sized,
{
    locks: Arc<L>,
    service: StockService<S>,
    config: NamedLockConfig,
}

impl<L, S> NamedLockStrategy<L, S>
where
    L: AdvisoryLockService + ?Sized + 'static,
    S: StockStore + ?Sized,
{
    pub fn new(locks: Arc<L>, store: Arc<S>) -> Self {
        Self::with_config(locks, store, NamedLockConfig::default())
    }

    pub fn with_config(locks: Arc<L>, store: Arc<S>, config: NamedLockConfig) -> Self {
        Self {
            locks,
            service: StockService::new(store),
            config,
        }
    }
}

#[async_trait]
impl<L, S> DecrementStrategy for NamedLockStrategy<L, S>
where
    L: AdvisoryLockService + ?Sized + 'static,
    S: StockStore + ?Sized,
{
    async fn decrease(&self, id: StockId, amount: u64) -> Result<(), DecrementError> {
        let key = lock_key(id);

        let granted = match self.locks.acquire(&key, self.config.acquire_timeout).await {
            Ok(granted) => granted,
            Err(source) => return Err(DecrementError::Storage { source }),
        };
        if !granted {
            // Nothing was acquired, so there is nothing to release and the
            // decrement must not run.
            return LockTimeoutSnafu {
                operation: format!("advisory lock '{key}'"),
            }
            .fail();
        }
        debug!(key = %key, "advisory lock acquired");

        let session = AdvisorySession::new(Arc::clone(&self.locks), key);
        let result = self.service.decrement(id, amount).await;
        session.release().await;
        result
    }
}

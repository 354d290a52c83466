//! Row-level pessimistic locking: the storage engine serializes
//! conflicting transactions.
//!
//! The row is fetched under an exclusive lock inside one transaction; the
//! lock releases implicitly when the transaction ends, on every path.
//! Lock-wait timeouts and deadlock aborts surface as retriable
//! [`DecrementError::Contention`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::{StockTransaction, StoreError, TransactionalStockStore};
use crate::coordination::error::{ContentionSnafu, DecrementError, NotFoundSnafu};
use crate::coordination::DecrementStrategy;
use crate::domain::StockId;

/// Exclusion pushed into the storage layer: serialization holds across all
/// processes and connections sharing the store, not just this process.
pub struct PessimisticLockStrategy<S: TransactionalStockStore + ?Sized> {
    store: Arc<S>,
}

impl<S: TransactionalStockStore + ?Sized> PessimisticLockStrategy<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

/// End the transaction without committing; the rollback itself is
/// best-effort since the original failure is what the caller sees.
async fn abort(txn: Box<dyn StockTransaction>) {
    if let Err(error) = txn.rollback().await {
        warn!(%error, "rollback after failed decrement also failed");
    }
}

#[async_trait]
impl<S: TransactionalStockStore + ?Sized> DecrementStrategy for PessimisticLockStrategy<S> {
    async fn decrease(&self, id: StockId, amount: u64) -> Result<(), DecrementError> {
        let mut txn = match self.store.begin().await {
            Ok(txn) => txn,
            Err(source) => return Err(DecrementError::Storage { source }),
        };

        let mut stock = match txn.fetch_for_update(id).await {
            Ok(stock) => stock,
            Err(StoreError::LockWaitTimeout { duration_ms }) => {
                abort(txn).await;
                return ContentionSnafu {
                    reason: format!("row lock wait exceeded {duration_ms}ms"),
                }
                .fail();
            }
            Err(StoreError::Deadlock { reason }) => {
                abort(txn).await;
                return ContentionSnafu { reason }.fail();
            }
            Err(StoreError::NotFound { id }) => {
                abort(txn).await;
                return NotFoundSnafu { id }.fail();
            }
            Err(source) => {
                abort(txn).await;
                return Err(DecrementError::Storage { source });
            }
        };

        if let Err(insufficient) = stock.decrement(amount) {
            abort(txn).await;
            return Err(insufficient.into());
        }

        if let Err(source) = txn.save(&stock).await {
            abort(txn).await;
            return Err(DecrementError::Storage { source });
        }

        match txn.commit().await {
            Ok(()) => {
                debug!(id = %id, amount, remaining = stock.quantity(), "decremented under row lock");
                Ok(())
            }
            Err(source) => Err(DecrementError::Storage { source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api::inmemory::DeterministicStockStore;
    use crate::api::StockStore;
    use crate::domain::Stock;

    #[tokio::test]
    async fn held_row_lock_surfaces_as_contention() {
        let store = DeterministicStockStore::with_row_lock_wait(Duration::from_millis(50));
        store.insert(Stock::new(StockId(1), 10)).await;

        // Another connection holds the row lock.
        let mut other = store.begin().await.unwrap();
        other.fetch_for_update(StockId(1)).await.unwrap();

        let strategy = PessimisticLockStrategy::new(store.clone());
        let err = strategy.decrease(StockId(1), 1).await.unwrap_err();
        assert!(matches!(err, DecrementError::Contention { .. }));
        assert_eq!(store.fetch(StockId(1)).await.unwrap().quantity(), 10);

        // The conflicting transaction ends and the retry succeeds.
        other.rollback().await.unwrap();
        strategy.decrease(StockId(1), 1).await.unwrap();
        assert_eq!(store.fetch(StockId(1)).await.unwrap().quantity(), 9);
    }

    #[tokio::test]
    async fn insufficient_stock_rolls_back_and_releases_the_row() {
        let store = DeterministicStockStore::new();
        store.insert(Stock::new(StockId(1), 3)).await;
        let strategy = PessimisticLockStrategy::new(store.clone());

        let err = strategy.decrease(StockId(1), 4).await.unwrap_err();
        assert!(matches!(err, DecrementError::InsufficientStock { .. }));
        assert_eq!(store.fetch(StockId(1)).await.unwrap().quantity(), 3);

        // The row lock was released with the rolled-back transaction.
        strategy.decrease(StockId(1), 3).await.unwrap();
        assert_eq!(store.fetch(StockId(1)).await.unwrap().quantity(), 0);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = DeterministicStockStore::new();
        let strategy = PessimisticLockStrategy::new(store);
        let err = strategy.decrease(StockId(7), 1).await.unwrap_err();
        assert!(matches!(err, DecrementError::NotFound { .. }));
    }
}

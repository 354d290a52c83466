//! The decrement operation: fetch, verify sufficiency, persist.
//!
//! This is the critical section every exclusion strategy wraps. It is NOT
//! safe to call concurrently on the same id without external exclusion:
//! two interleaved calls read the same quantity and one update is lost.

use std::sync::Arc;

use tracing::debug;

use crate::api::{StockStore, StoreError};
use crate::coordination::error::{DecrementError, NotFoundSnafu};
use crate::domain::{Stock, StockId};

/// Read-modify-write service over the stock store.
///
/// Each successful call consumes `amount` exactly once: no internal retry,
/// no idempotency. The write is persisted synchronously before returning.
pub struct StockService<S: StockStore + ?Sized> {
    store: Arc<S>,
}

impl<S: StockStore + ?Sized> StockService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Fetch the stock, remove `amount` units, and persist the new quantity.
    ///
    /// Fails with [`DecrementError::NotFound`] for an unknown id and
    /// [`DecrementError::InsufficientStock`] when the request exceeds the
    /// on-hand quantity; the stored value is untouched in both cases.
    pub async fn decrement(&self, id: StockId, amount: u64) -> Result<(), DecrementError> {
        let mut stock = match self.store.fetch(id).await {
            Ok(stock) => stock,
            Err(StoreError::NotFound { id }) => return NotFoundSnafu { id }.fail(),
            Err(source) => return Err(DecrementError::Storage { source }),
        };

        stock.decrement(amount)?;

        match self.store.save(&stock).await {
            Ok(()) => {
                debug!(id = %id, amount, remaining = stock.quantity(), "stock decremented");
                Ok(())
            }
            Err(source) => Err(DecrementError::Storage { source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::inmemory::DeterministicStockStore;
    use crate::coordination::error::DecrementError;

    #[tokio::test]
    async fn decrement_persists_the_new_quantity() {
        let store = DeterministicStockStore::new();
        store.insert(Stock::new(StockId(1), 100)).await;
        let service = StockService::new(store.clone());

        service.decrement(StockId(1), 1).await.unwrap();

        assert_eq!(store.fetch(StockId(1)).await.unwrap().quantity(), 99);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = DeterministicStockStore::new();
        let service = StockService::new(store);

        let err = service.decrement(StockId(9), 1).await.unwrap_err();
        assert!(matches!(err, DecrementError::NotFound { .. }));
    }

    #[tokio::test]
    async fn over_decrement_leaves_the_stored_value_untouched() {
        let store = DeterministicStockStore::new();
        store.insert(Stock::new(StockId(1), 3)).await;
        let service = StockService::new(store.clone());

        let err = service.decrement(StockId(1), 4).await.unwrap_err();
        assert!(matches!(err, DecrementError::InsufficientStock { .. }));
        assert_eq!(store.fetch(StockId(1)).await.unwrap().quantity(), 3);
    }
}

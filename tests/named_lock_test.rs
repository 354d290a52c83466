//! Advisory-lock strategy: acquisition gating and unconditional release.

use std::sync::Arc;
use std::time::Duration;

use stockpile::api::inmemory::{DeterministicAdvisoryLocks, DeterministicStockStore};
use stockpile::coordination::lock_key;
use stockpile::{
    AdvisoryLockService, DecrementError, DecrementStrategy, NamedLockConfig, NamedLockStrategy,
    Stock, StockId, StockStore,
};

fn short_wait() -> NamedLockConfig {
    NamedLockConfig {
        acquire_timeout: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn denied_acquisition_never_touches_the_store() {
    let store = DeterministicStockStore::new();
    store.insert(Stock::new(StockId(1), 100)).await;
    let locks = DeterministicAdvisoryLocks::new();

    // Another session holds the named lock for this stock.
    assert!(locks
        .acquire(&lock_key(StockId(1)), Duration::from_millis(10))
        .await
        .unwrap());

    let strategy = NamedLockStrategy::with_config(locks.clone(), store.clone(), short_wait());
    let err = strategy.decrease(StockId(1), 1).await.unwrap_err();

    assert!(matches!(err, DecrementError::LockTimeout { .. }));
    assert_eq!(store.fetch_count(), 0, "the decrement must not have begun");
    assert_eq!(store.save_count(), 0);
    assert_eq!(store.begin_count(), 0);

    // Once the foreign session releases, the same call goes through.
    locks.release(&lock_key(StockId(1))).await.unwrap();
    strategy.decrease(StockId(1), 1).await.unwrap();
    assert_eq!(store.fetch(StockId(1)).await.unwrap().quantity(), 99);
}

#[tokio::test]
async fn lock_is_released_after_success() {
    let store = DeterministicStockStore::new();
    store.insert(Stock::new(StockId(1), 100)).await;
    let locks = DeterministicAdvisoryLocks::new();
    let strategy = NamedLockStrategy::new(locks.clone(), store.clone());

    strategy.decrease(StockId(1), 1).await.unwrap();

    // The key is free again for any other session.
    assert!(locks
        .acquire(&lock_key(StockId(1)), Duration::from_millis(10))
        .await
        .unwrap());
}

#[tokio::test]
async fn lock_is_released_when_the_decrement_fails() {
    let store = DeterministicStockStore::new();
    store.insert(Stock::new(StockId(1), 3)).await;
    let locks = DeterministicAdvisoryLocks::new();
    let strategy = NamedLockStrategy::new(locks.clone(), store.clone());

    let err = strategy.decrease(StockId(1), 4).await.unwrap_err();
    assert!(matches!(err, DecrementError::InsufficientStock { .. }));
    assert_eq!(store.fetch(StockId(1)).await.unwrap().quantity(), 3);

    assert!(locks
        .acquire(&lock_key(StockId(1)), Duration::from_millis(10))
        .await
        .unwrap());
}

#[tokio::test]
async fn missing_stock_surfaces_not_found_and_still_releases() {
    let store = DeterministicStockStore::new();
    let locks = DeterministicAdvisoryLocks::new();
    let strategy = NamedLockStrategy::new(locks.clone(), store);

    let err = strategy.decrease(StockId(42), 1).await.unwrap_err();
    assert!(matches!(err, DecrementError::NotFound { .. }));

    assert!(locks
        .acquire(&lock_key(StockId(42)), Duration::from_millis(10))
        .await
        .unwrap());
}

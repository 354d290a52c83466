//! Lost-update properties under 100 concurrent callers, per strategy.

use std::sync::Arc;
use std::time::Duration;

use stockpile::api::inmemory::{DeterministicLockStateStore, DeterministicStockStore};
use stockpile::{
    DecrementError, DecrementStrategy, DistributedLeaseStrategy, ExclusionScope, LeaseConfig,
    MutexStrategy, NamedLockStrategy, PessimisticLockStrategy, Stock, StockId, StockStore,
};

const STOCK: StockId = StockId(1);
const INITIAL: u64 = 100;
const CALLERS: usize = 100;

async fn seeded_store() -> Arc<DeterministicStockStore> {
    let store = DeterministicStockStore::new();
    store.insert(Stock::new(STOCK, INITIAL)).await;
    store
}

async fn run_callers(
    strategy: Arc<dyn DecrementStrategy>,
) -> Vec<Result<(), DecrementError>> {
    let mut handles = Vec::with_capacity(CALLERS);
    for _ in 0..CALLERS {
        let strategy = Arc::clone(&strategy);
        handles.push(tokio::spawn(async move { strategy.decrease(STOCK, 1).await }));
    }

    let mut results = Vec::with_capacity(CALLERS);
    for handle in handles {
        results.push(handle.await.expect("caller panicked"));
    }
    results
}

async fn final_quantity(store: &DeterministicStockStore) -> u64 {
    store.fetch(STOCK).await.expect("stock row").quantity()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn global_mutex_loses_no_updates() {
    let store = seeded_store().await;
    let strategy = Arc::new(MutexStrategy::new(store.clone(), ExclusionScope::Global));

    let results = run_callers(strategy).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(final_quantity(&store).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn per_stock_mutex_loses_no_updates() {
    let store = seeded_store().await;
    let strategy = Arc::new(MutexStrategy::new(store.clone(), ExclusionScope::PerStock));

    let results = run_callers(strategy).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(final_quantity(&store).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn pessimistic_row_lock_100_callers_zero_errors() {
    let store = seeded_store().await;
    let strategy = Arc::new(PessimisticLockStrategy::new(store.clone()));

    let results = run_callers(strategy).await;

    // 100 - (100 * 1) = 0, and nobody hit the lock-wait bound.
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(final_quantity(&store).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn named_lock_loses_no_updates() {
    let store = seeded_store().await;
    let locks = stockpile::api::inmemory::DeterministicAdvisoryLocks::new();
    let strategy = Arc::new(NamedLockStrategy::new(locks, store.clone()));

    let results = run_callers(strategy).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(final_quantity(&store).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn distributed_lease_loses_no_updates() {
    let store = seeded_store().await;
    let coordinator = DeterministicLockStateStore::new();
    // Generous wait and tight backoff so all 100 callers acquire within
    // the bound; the default 10s wait is sized for sparser contention.
    let config = LeaseConfig {
        wait_ms: 30_000,
        lease_ms: 1_000,
        initial_backoff_ms: 1,
        max_backoff_ms: 20,
    };
    let strategy = Arc::new(DistributedLeaseStrategy::with_config(
        coordinator,
        store.clone(),
        "caller-fleet",
        config,
    ));

    let results = run_callers(strategy).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(final_quantity(&store).await, 0);
}

/// Two lock registries over one shared store model two processes that
/// each hold only their own in-process mutex: updates are lost, which is
/// exactly the documented protection gap of process-local exclusion.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn separate_process_mutexes_lose_updates() {
    let store = DeterministicStockStore::with_simulated_latency(Duration::from_millis(2));
    store.insert(Stock::new(STOCK, INITIAL)).await;

    let process_a = Arc::new(MutexStrategy::new(store.clone(), ExclusionScope::Global));
    let process_b = Arc::new(MutexStrategy::new(store.clone(), ExclusionScope::Global));

    let mut handles = Vec::with_capacity(CALLERS);
    for caller in 0..CALLERS {
        let strategy = if caller % 2 == 0 {
            Arc::clone(&process_a)
        } else {
            Arc::clone(&process_b)
        };
        handles.push(tokio::spawn(async move { strategy.decrease(STOCK, 1).await }));
    }
    for handle in handles {
        handle.await.expect("caller panicked").expect("decrement");
    }

    let remaining = final_quantity(&store).await;
    assert!(
        remaining > 0,
        "two processes behind separate mutexes should lose updates, got {remaining}"
    );
}

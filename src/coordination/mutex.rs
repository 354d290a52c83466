//! In-process mutual exclusion around the decrement operation.
//!
//! Serializes concurrent callers within one process. Provides no
//! protection across separate processes: two processes each holding their
//! own mutex still interleave freely on the shared store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::api::StockStore;
use crate::coordination::error::DecrementError;
use crate::coordination::DecrementStrategy;
use crate::domain::{StockId, StockService};

/// What one lock acquisition excludes.
///
/// The scope is an explicit, testable parameter rather than an implicit
/// property of some object instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionScope {
    /// A single lock shared by every stock id: all decrements serialize.
    Global,
    /// One lock per stock id: decrements on distinct ids proceed in
    /// parallel.
    PerStock,
}

/// Process-local mutex strategy.
///
/// Callers block until the configured lock is free; only mutual exclusion
/// is guaranteed, not arrival-order fairness. Operation errors propagate
/// to the caller after the lock is released.
pub struct MutexStrategy<S: StockStore + ?Sized> {
    service: StockService<S>,
    scope: ExclusionScope,
    global: Mutex<()>,
    per_stock: Mutex<HashMap<StockId, Arc<Mutex<()>>>>,
}

impl<S: StockStore + ?Sized> MutexStrategy<S> {
    pub fn new(store: Arc<S>, scope: ExclusionScope) -> Self {
        Self {
            service: StockService::new(store),
            scope,
            global: Mutex::new(()),
            per_stock: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<S: StockStore + ?Sized> DecrementStrategy for MutexStrategy<S> {
    async fn decrease(&self, id: StockId, amount: u64) -> Result<(), DecrementError> {
        match self.scope {
            ExclusionScope::Global => {
                let _guard = self.global.lock().await;
                self.service.decrement(id, amount).await
            }
            ExclusionScope::PerStock => {
                let lock = {
                    let mut locks = self.per_stock.lock().await;
                    Arc::clone(locks.entry(id).or_default())
                };
                let _guard = lock.lock().await;
                self.service.decrement(id, amount).await
            }
        }
    }
}

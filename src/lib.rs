//! Race-free decrement of a shared, persisted stock quantity.
//!
//! Many concurrent actors decrementing one counter lose updates unless the
//! read-decrement-write sequence runs under mutual exclusion. This crate
//! provides the decrement operation plus four exclusion strategies around
//! it, selectable per deployment:
//!
//! - [`MutexStrategy`]: in-process serialization, single process only
//! - [`PessimisticLockStrategy`]: exclusive row lock held by the storage
//!   engine for the transaction
//! - [`NamedLockStrategy`]: key-scoped advisory lock from the database
//!   server, separate from the data transaction
//! - [`DistributedLeaseStrategy`]: lease from an external coordination
//!   service, with fencing tokens and heartbeat renewal
//!
//! Storage and lock services are collaborators behind narrow traits in
//! [`api`]; deterministic in-memory implementations for testing live in
//! [`api::inmemory`].

pub mod api;
pub mod coordination;
pub mod domain;

pub use api::{
    AdvisoryLockService, LockStateStore, StockStore, StockTransaction, StoreError,
    TransactionalStockStore,
};
pub use coordination::{
    DecrementError, DecrementStrategy, DistributedLeaseStrategy, ExclusionScope, LeaseConfig,
    MutexStrategy, NamedLockConfig, NamedLockStrategy, PessimisticLockStrategy,
};
pub use domain::{InsufficientStock, Stock, StockId, StockService};

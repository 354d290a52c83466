//! Mutual-exclusion strategies around the stock decrement operation.
//!
//! Each strategy wraps the same decrement with a different acquisition and
//! release protocol. Exclusion scope differs (process-local for the
//! mutex, cluster-wide for the row lock, advisory lock, and lease), and
//! strategies must not be mixed on the same counter: a process-local mutex
//! gives zero protection against another process using none.
//!
//! Across every strategy the only guarantee is mutual exclusion of the
//! critical section per stock id; none promises FIFO fairness.

pub mod error;
pub mod lease;
pub mod mutex;
pub mod named;
pub mod pessimistic;
pub mod types;

use async_trait::async_trait;

pub use error::DecrementError;
pub use lease::{DistributedLeaseStrategy, LeaseConfig, LeaseGuard, LeaseLock, ReleaseOutcome};
pub use mutex::{ExclusionScope, MutexStrategy};
pub use named::{NamedLockConfig, NamedLockStrategy};
pub use pessimistic::PessimisticLockStrategy;
pub use types::{lock_key, FencingToken, LeaseEntry, LeaseState};

use crate::domain::StockId;

/// Observable surface shared by every exclusion strategy.
#[async_trait]
pub trait DecrementStrategy: Send + Sync {
    /// Remove `amount` units from stock `id` under this strategy's
    /// exclusion protocol.
    async fn decrease(&self, id: StockId, amount: u64) -> Result<(), DecrementError>;
}

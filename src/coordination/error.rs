//! Error taxonomy for the decrement operation and its exclusion strategies.

use snafu::Snafu;

use crate::api::StoreError;
use crate::domain::{InsufficientStock, StockId};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecrementError {
    /// The stock id is unknown. Fatal to the call, not retriable.
    #[snafu(display("stock {id} not found"))]
    NotFound { id: StockId },

    /// The request exceeds the on-hand quantity; the stored value is
    /// unchanged. The caller decides whether to retry with a smaller
    /// amount.
    #[snafu(context(false))]
    #[snafu(display("{source}"))]
    InsufficientStock { source: InsufficientStock },

    /// Exclusion was not obtained within the wait bound. Retriable.
    #[snafu(display("timed out waiting for {operation}"))]
    LockTimeout { operation: String },

    /// The distributed lease stayed unavailable within the wait bound.
    /// A normal contention outcome, retriable; the decrement did not run.
    #[snafu(display("lease '{key}' unavailable within the wait bound"))]
    Unavailable { key: String },

    /// The storage engine detected a conflict (lock-wait timeout or
    /// deadlock abort). The whole transaction may be retried.
    #[snafu(display("storage lock contention: {reason}"))]
    Contention { reason: String },

    /// The lease expired or was taken over before the operation completed.
    #[snafu(display("lease '{key}' lost before the operation completed"))]
    LeaseLost { key: String },

    /// A blocking wait was cancelled; propagated, never swallowed.
    #[snafu(display("{operation} was interrupted"))]
    Interrupted { operation: String },

    /// Lock state in the coordination service could not be decoded.
    #[snafu(display("corrupted lock state at '{key}': {reason}"))]
    CorruptedData { key: String, reason: String },

    #[snafu(display("storage error: {source}"))]
    Storage { source: StoreError },

    #[snafu(context(false))]
    #[snafu(display("lease entry serialization: {source}"))]
    Serialization { source: serde_json::Error },
}

impl DecrementError {
    /// Whether the caller may retry the whole operation: exclusion was not
    /// obtained and no state changed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            DecrementError::LockTimeout { .. }
                | DecrementError::Unavailable { .. }
                | DecrementError::Contention { .. }
        )
    }
}

//! Shared lock-state types for the exclusion strategies.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::domain::StockId;

/// Prefix for lock keys derived from stock ids.
const STOCK_LOCK_PREFIX: &str = "stock:";

/// Render a stock id as the lock name shared by the named and lease
/// strategies.
pub fn lock_key(id: StockId) -> String {
    format!("{STOCK_LOCK_PREFIX}{id}")
}

/// Current wall-clock time in unix milliseconds.
pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Monotonically increasing token identifying one lease grant.
///
/// Tokens only grow per key, so a holder that lost its lease can be
/// rejected by comparing tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FencingToken(pub u64);

impl FencingToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Observable state of a lease grant. Never collapsed into a boolean:
/// an expired lease is not the same as a released one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// The lease is held and its deadline has not passed.
    Held,
    /// The deadline passed (or another holder took over) before release.
    Expired,
    /// The holder released the lease explicitly.
    Released,
}

/// Wire representation of a lease in the lock-state store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseEntry {
    pub holder_id: String,
    pub fencing_token: u64,
    /// Unix-millisecond deadline after which the lease no longer excludes.
    pub deadline_ms: u64,
    pub released: bool,
}

impl LeaseEntry {
    /// A fresh lease held by `holder_id`, expiring `lease_ms` from now.
    pub fn new(holder_id: String, fencing_token: u64, lease_ms: u64) -> Self {
        Self {
            holder_id,
            fencing_token,
            deadline_ms: now_unix_ms() + lease_ms,
            released: false,
        }
    }

    /// Whether this entry no longer excludes other holders.
    pub fn is_expired(&self) -> bool {
        self.released || now_unix_ms() >= self.deadline_ms
    }

    /// Copy of this entry marked released.
    pub fn released(&self) -> Self {
        Self {
            released: true,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lease_is_not_expired() {
        let entry = LeaseEntry::new("holder".into(), 1, 60_000);
        assert!(!entry.is_expired());
    }

    #[test]
    fn released_lease_is_expired_regardless_of_deadline() {
        let entry = LeaseEntry::new("holder".into(), 1, 60_000).released();
        assert!(entry.is_expired());
    }

    #[test]
    fn past_deadline_is_expired() {
        let mut entry = LeaseEntry::new("holder".into(), 1, 60_000);
        entry.deadline_ms = now_unix_ms().saturating_sub(1);
        assert!(entry.is_expired());
    }

    #[test]
    fn lock_key_renders_the_stock_id() {
        assert_eq!(lock_key(StockId(42)), "stock:42");
    }
}

//! The stock entity: an identifier plus a non-negative on-hand quantity.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable identifier for a stock row. Assigned at creation, never reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockId(pub u64);

impl fmt::Display for StockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rejected decrement: the requested amount exceeds what is on hand.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stock {id} has {available} on hand, cannot remove {requested}")]
pub struct InsufficientStock {
    pub id: StockId,
    pub available: u64,
    pub requested: u64,
}

/// A persisted stock record.
///
/// The quantity is non-negative at all observable times; it only moves
/// through [`Stock::decrement`] and [`Stock::increment`], and a decrement
/// that would underflow is rejected without mutating the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    id: StockId,
    quantity: u64,
}

impl Stock {
    /// Create a stock record with an initial on-hand quantity.
    pub fn new(id: StockId, quantity: u64) -> Self {
        Self { id, quantity }
    }

    pub fn id(&self) -> StockId {
        self.id
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    /// Remove `amount` units, rejecting the call if it would underflow.
    pub fn decrement(&mut self, amount: u64) -> Result<(), InsufficientStock> {
        match self.quantity.checked_sub(amount) {
            Some(remaining) => {
                self.quantity = remaining;
                Ok(())
            }
            None => Err(InsufficientStock {
                id: self.id,
                available: self.quantity,
                requested: amount,
            }),
        }
    }

    /// Add `amount` units back (restock).
    pub fn increment(&mut self, amount: u64) {
        self.quantity = self.quantity.saturating_add(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrement_within_stock() {
        let mut stock = Stock::new(StockId(1), 100);
        stock.decrement(1).unwrap();
        assert_eq!(stock.quantity(), 99);
    }

    #[test]
    fn decrement_to_zero_is_allowed() {
        let mut stock = Stock::new(StockId(1), 5);
        stock.decrement(5).unwrap();
        assert_eq!(stock.quantity(), 0);
    }

    #[test]
    fn over_decrement_is_rejected_and_leaves_quantity_unchanged() {
        let mut stock = Stock::new(StockId(1), 3);
        let err = stock.decrement(4).unwrap_err();
        assert_eq!(
            err,
            InsufficientStock {
                id: StockId(1),
                available: 3,
                requested: 4,
            }
        );
        assert_eq!(stock.quantity(), 3);
    }

    #[test]
    fn increment_restocks() {
        let mut stock = Stock::new(StockId(1), 0);
        stock.increment(7);
        assert_eq!(stock.quantity(), 7);
    }
}

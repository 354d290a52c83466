//! Domain layer: the stock entity and the decrement operation.

pub mod stock;
pub mod stock_service;

pub use stock::{InsufficientStock, Stock, StockId};
pub use stock_service::StockService;

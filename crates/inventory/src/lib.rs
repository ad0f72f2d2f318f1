//! Inventory domain module.
//!
//! Warehouses own ordered product lists; the `stock` module computes and
//! validates quantity changes purely (no IO, no HTTP, no storage).

pub mod stock;
pub mod warehouse;

pub use stock::{Adjustment, StockDeltas, StockError, StockLine, StockPlan, WarehouseChange};
pub use warehouse::{NewProduct, Product, ProductPatch, Warehouse};

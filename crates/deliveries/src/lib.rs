//! Delivery domain module: deliveries of goods to families, their lines and
//! lifecycle. Stock effects are expressed as `StockLine`s for the planner in
//! `almoner-inventory`.

pub mod delivery;

pub use delivery::{Delivery, DeliveryLine, DeliveryPatch, DeliveryState, NewDelivery};

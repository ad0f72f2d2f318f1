//! Infrastructure layer: record stores, stock reconciliation, domain services
//! and configuration.

pub mod config;
pub mod fanout;
pub mod families;
pub mod ledger;
pub mod patients;
pub mod reconciler;
pub mod store;
pub mod stores;
pub mod warehouses;

pub use config::{AppConfig, ConfigError};
pub use families::FamilyRegistry;
pub use ledger::{DeliveryLedger, Reconciler};
pub use patients::PatientRegistry;
pub use stores::{Stores, WiringError};
pub use warehouses::{ProductLocator, WarehouseRepository, WarehouseService, Warehouses};

use chrono::{NaiveDate, Utc};

/// Current UTC calendar date, the reference for "not in the past" checks.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

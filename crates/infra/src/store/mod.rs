//! Record store boundary.
//!
//! Domain services read and write whole records through [`RecordStore`];
//! the in-memory store serves tests/dev and the Postgres store keeps every
//! kind as JSONB documents.

pub mod filter;
pub mod memory;
pub mod postgres;
pub mod r#trait;

pub use filter::{DeliveryFilter, FamilyFilter, PatientFilter, WarehouseFilter};
pub use memory::InMemoryRecordStore;
pub use postgres::PostgresRecordStore;
pub use r#trait::{
    BulkFailure, BulkOp, BulkOutcome, DeleteOutcome, Page, Record, RecordFilter, RecordStore,
    StoreError,
};

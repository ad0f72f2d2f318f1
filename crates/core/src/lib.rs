//! `almoner-core`: shared domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, the domain error model and the optimistic
//! concurrency expectation used by every record store.

pub mod entity;
pub mod error;
pub mod id;
pub mod version;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{DeliveryId, FamilyId, PatientId, PersonId, ProductId, WarehouseId};
pub use version::ExpectedVersion;

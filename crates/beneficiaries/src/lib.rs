//! Beneficiary domain module: families with embedded members, and patients.
//!
//! Pure domain rules only; persistence lives in `almoner-infra`.

pub mod family;
pub mod patient;
pub mod person;

pub use family::{Family, FamilyPatch, FamilySummary, NewFamily};
pub use patient::{NewPatient, Patient, PatientPatch};
pub use person::{Gender, NewPerson, Person, normalize_national_id};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use almoner_core::{DomainError, DomainResult, Entity, PatientId};

use crate::person::{Gender, normalize_national_id, required};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPatient {
    pub name: String,
    pub surname: String,
    pub national_id: String,
    pub gender: Gender,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
}

impl From<NewPatient> for PatientPatch {
    fn from(p: NewPatient) -> Self {
        Self {
            name: Some(p.name),
            surname: Some(p.surname),
            national_id: Some(p.national_id),
            gender: Some(p.gender),
            birth_date: p.birth_date,
            phone: p.phone,
            address: p.address,
            observations: p.observations,
        }
    }
}

/// Patient record; `national_id` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    id: PatientId,
    pub name: String,
    pub surname: String,
    national_id: String,
    pub gender: Gender,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
    #[serde(default)]
    version: u64,
}

impl Patient {
    pub fn create(new: NewPatient) -> DomainResult<Self> {
        let national_id = normalize_national_id(Some(&new.national_id))
            .ok_or_else(|| DomainError::bad_request("national_id cannot be empty"))?;
        Ok(Self {
            id: PatientId::new(),
            name: required("name", &new.name)?,
            surname: required("surname", &new.surname)?,
            national_id,
            gender: new.gender,
            birth_date: new.birth_date,
            phone: new.phone,
            address: new.address,
            observations: new.observations,
            version: 0,
        })
    }

    pub fn national_id(&self) -> &str {
        &self.national_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Merge the non-null fields of `patch`.
    pub fn apply_patch(&mut self, patch: PatientPatch) -> DomainResult<()> {
        if let Some(name) = patch.name {
            self.name = required("name", &name)?;
        }
        if let Some(surname) = patch.surname {
            self.surname = required("surname", &surname)?;
        }
        if let Some(nid) = patch.national_id {
            self.national_id = normalize_national_id(Some(&nid))
                .ok_or_else(|| DomainError::bad_request("national_id cannot be empty"))?;
        }
        if let Some(gender) = patch.gender {
            self.gender = gender;
        }
        if patch.birth_date.is_some() {
            self.birth_date = patch.birth_date;
        }
        if patch.phone.is_some() {
            self.phone = patch.phone;
        }
        if patch.address.is_some() {
            self.address = patch.address;
        }
        if patch.observations.is_some() {
            self.observations = patch.observations;
        }
        Ok(())
    }
}

impl Entity for Patient {
    type Id = PatientId;

    fn id(&self) -> PatientId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_patient() -> NewPatient {
        NewPatient {
            name: "Luis".to_string(),
            surname: "Perez".to_string(),
            national_id: " x123 ".to_string(),
            gender: Gender::Male,
            birth_date: None,
            phone: None,
            address: None,
            observations: None,
        }
    }

    #[test]
    fn create_normalizes_national_id() {
        let p = Patient::create(new_patient()).unwrap();
        assert_eq!(p.national_id(), "X123");
    }

    #[test]
    fn create_rejects_blank_national_id() {
        let mut new = new_patient();
        new.national_id = "  ".to_string();
        assert!(matches!(Patient::create(new), Err(DomainError::BadRequest(_))));
    }

    #[test]
    fn patch_merges_non_null_fields() {
        let mut p = Patient::create(new_patient()).unwrap();
        p.apply_patch(PatientPatch {
            phone: Some("600".to_string()),
            ..PatientPatch::default()
        })
        .unwrap();
        assert_eq!(p.phone.as_deref(), Some("600"));
        assert_eq!(p.name, "Luis");
    }
}

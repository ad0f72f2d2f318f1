use std::sync::Arc;

use tracing::{info, instrument};

use almoner_beneficiaries::{NewPatient, Patient, PatientPatch};
use almoner_core::{DomainError, DomainResult, Entity, ExpectedVersion, PatientId};

use crate::store::{Page, PatientFilter, RecordStore};

/// Patient CRUD keyed by national id.
#[derive(Clone)]
pub struct PatientRegistry {
    patients: Arc<dyn RecordStore<Patient>>,
}

impl PatientRegistry {
    pub fn new(patients: Arc<dyn RecordStore<Patient>>) -> Self {
        Self { patients }
    }

    pub async fn get(&self, id: PatientId) -> DomainResult<Patient> {
        self.patients
            .get(&PatientFilter::by_id(id))
            .await?
            .ok_or_else(|| DomainError::not_found(format!("patient {id}")))
    }

    pub async fn list(&self, page: Page) -> DomainResult<(Vec<Patient>, u64)> {
        let filter = PatientFilter::all();
        let items = self.patients.get_multi(&filter, page).await?;
        let total = self.patients.count(&filter).await?;
        Ok((items, total))
    }

    async fn ensure_national_id_free(&self, national_id: &str, except: Option<PatientId>) -> DomainResult<()> {
        match self.patients.get(&PatientFilter::by_national_id(national_id)).await? {
            Some(p) if Some(p.id()) != except => Err(DomainError::conflict(format!(
                "a patient with national id {national_id} already exists"
            ))),
            _ => Ok(()),
        }
    }

    #[instrument(skip(self, new), err)]
    pub async fn create(&self, new: NewPatient) -> DomainResult<Patient> {
        let patient = Patient::create(new)?;
        self.ensure_national_id_free(patient.national_id(), None).await?;
        self.patients.create(patient.clone()).await?;
        info!(patient_id = %patient.id(), "patient created");
        Ok(patient)
    }

    #[instrument(skip(self, patch), err)]
    pub async fn update(&self, id: PatientId, patch: PatientPatch) -> DomainResult<Patient> {
        let mut patient = self.get(id).await?;
        patient.apply_patch(patch)?;
        self.ensure_national_id_free(patient.national_id(), Some(id)).await?;
        let expected = ExpectedVersion::Exact(patient.version());
        let saved = self
            .patients
            .replace(patient, expected)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("patient {id}")))?;
        info!(patient_id = %id, "patient updated");
        Ok(saved)
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&self, id: PatientId) -> DomainResult<()> {
        let outcome = self.patients.delete(&PatientFilter::by_id(id)).await?;
        if outcome.deleted_count == 0 {
            return Err(DomainError::not_found(format!("patient {id}")));
        }
        info!(patient_id = %id, "patient deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRecordStore;
    use almoner_beneficiaries::Gender;

    fn registry() -> PatientRegistry {
        PatientRegistry::new(Arc::new(InMemoryRecordStore::<Patient>::new()))
    }

    fn new_patient(nid: &str) -> NewPatient {
        NewPatient {
            name: "Marta".into(),
            surname: "Gil".into(),
            national_id: nid.into(),
            gender: Gender::Female,
            birth_date: None,
            phone: None,
            address: None,
            observations: None,
        }
    }

    #[tokio::test]
    async fn national_id_is_unique() {
        let registry = registry();
        registry.create(new_patient("77a")).await.unwrap();
        let err = registry.create(new_patient(" 77A")).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_rechecks_national_id() {
        let registry = registry();
        registry.create(new_patient("1")).await.unwrap();
        let second = registry.create(new_patient("2")).await.unwrap();

        let err = registry
            .update(
                second.id(),
                PatientPatch {
                    national_id: Some("1".into()),
                    ..PatientPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));

        let saved = registry
            .update(
                second.id(),
                PatientPatch {
                    phone: Some("600".into()),
                    ..PatientPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(saved.version(), 1);
        assert_eq!(saved.phone.as_deref(), Some("600"));
    }
}

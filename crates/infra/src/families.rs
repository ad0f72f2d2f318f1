use std::sync::Arc;

use tracing::{info, instrument, warn};

use almoner_beneficiaries::{Family, FamilyPatch, NewFamily, NewPerson, Person, normalize_national_id};
use almoner_core::{DomainError, DomainResult, Entity, ExpectedVersion, FamilyId, PersonId};
use almoner_deliveries::Delivery;

use crate::fanout::{FanOutReport, propagate_family_summary};
use crate::store::{FamilyFilter, Page, RecordStore};

/// Family and member CRUD. Changes to the head or contact data are pushed
/// to the deliveries embedding the family.
#[derive(Clone)]
pub struct FamilyRegistry {
    families: Arc<dyn RecordStore<Family>>,
    deliveries: Arc<dyn RecordStore<Delivery>>,
}

impl FamilyRegistry {
    pub fn new(
        families: Arc<dyn RecordStore<Family>>,
        deliveries: Arc<dyn RecordStore<Delivery>>,
    ) -> Self {
        Self {
            families,
            deliveries,
        }
    }

    pub async fn get(&self, id: FamilyId) -> DomainResult<Family> {
        self.families
            .get(&FamilyFilter::by_id(id))
            .await?
            .ok_or_else(|| DomainError::not_found(format!("family {id}")))
    }

    pub async fn list(&self, page: Page) -> DomainResult<(Vec<Family>, u64)> {
        let filter = FamilyFilter::all();
        let items = self.families.get_multi(&filter, page).await?;
        let total = self.families.count(&filter).await?;
        Ok((items, total))
    }

    /// Fail when any of `national_ids` already belongs to a family other than `except`.
    async fn ensure_national_ids_free(
        &self,
        national_ids: Vec<String>,
        except: Option<FamilyId>,
    ) -> DomainResult<()> {
        if national_ids.is_empty() {
            return Ok(());
        }
        let filter = FamilyFilter {
            member_national_id_any: Some(national_ids.clone()),
            ..FamilyFilter::default()
        };
        let holders = self.families.get_multi(&filter, Page::all()).await?;
        if let Some(holder) = holders.iter().find(|f| Some(f.id()) != except) {
            let taken = holder
                .national_ids()
                .find(|nid| national_ids.iter().any(|n| n == nid))
                .unwrap_or_default();
            return Err(DomainError::conflict(format!(
                "national id {taken} already belongs to family {}",
                holder.id()
            )));
        }
        Ok(())
    }

    async fn save(&self, family: Family) -> DomainResult<Family> {
        let id = family.id();
        let expected = ExpectedVersion::Exact(family.version());
        self.families
            .replace(family, expected)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("family {id}")))
    }

    async fn fan_out(&self, family: &Family) -> FanOutReport {
        match propagate_family_summary(self.deliveries.as_ref(), family).await {
            Ok(report) => report,
            Err(e) => {
                warn!(family_id = %family.id(), error = %e, "family copy refresh skipped");
                FanOutReport::default()
            }
        }
    }

    #[instrument(skip(self, new), fields(members = new.members.len()), err)]
    pub async fn create(&self, new: NewFamily) -> DomainResult<Family> {
        let family = Family::create(new)?;
        self.ensure_national_ids_free(family.national_ids().map(str::to_string).collect(), None)
            .await?;
        self.families.create(family.clone()).await?;
        info!(family_id = %family.id(), members = family.members().len(), "family created");
        Ok(family)
    }

    #[instrument(skip(self, patch), err)]
    pub async fn update(&self, id: FamilyId, patch: FamilyPatch) -> DomainResult<Family> {
        let mut family = self.get(id).await?;
        family.apply_patch(patch);
        let saved = self.save(family).await?;
        let report = self.fan_out(&saved).await;
        info!(family_id = %id, refreshed = report.modified, "family updated");
        Ok(saved)
    }

    #[instrument(skip(self, new), err)]
    pub async fn add_member(&self, id: FamilyId, new: NewPerson) -> DomainResult<Person> {
        let mut family = self.get(id).await?;
        if let Some(nid) = normalize_national_id(new.national_id.as_deref()) {
            self.ensure_national_ids_free(vec![nid], Some(id)).await?;
        }
        let person_id = family.add_member(new)?;
        let saved = self.save(family).await?;
        self.fan_out(&saved).await;
        let person = saved
            .member(person_id)
            .cloned()
            .ok_or_else(|| DomainError::internal(format!("member {person_id} lost on save")))?;
        info!(family_id = %id, person_id = %person_id, "family member added");
        Ok(person)
    }

    #[instrument(skip(self), err)]
    pub async fn remove_member(&self, id: FamilyId, person_id: PersonId) -> DomainResult<()> {
        let mut family = self.get(id).await?;
        family.remove_member(person_id)?;
        let saved = self.save(family).await?;
        self.fan_out(&saved).await;
        info!(family_id = %id, person_id = %person_id, "family member removed");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&self, id: FamilyId) -> DomainResult<()> {
        let outcome = self.families.delete(&FamilyFilter::by_id(id)).await?;
        if outcome.deleted_count == 0 {
            return Err(DomainError::not_found(format!("family {id}")));
        }
        info!(family_id = %id, "family deleted");
        Ok(())
    }
}

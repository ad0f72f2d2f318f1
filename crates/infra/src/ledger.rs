//! Delivery ledger: delivery CRUD with stock kept in step.
//!
//! Creating a delivery reserves its lines, updating lines moves stock by
//! `old - new` per product, and deleting a delivery that was not delivered
//! returns its stock. Validation always runs before the first write.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use almoner_beneficiaries::{Family, FamilySummary};
use almoner_core::{DeliveryId, DomainError, DomainResult, Entity, ExpectedVersion, FamilyId};
use almoner_deliveries::{Delivery, DeliveryPatch, NewDelivery};
use almoner_inventory::StockPlan;

use crate::reconciler::StockReconciler;
use crate::store::{DeliveryFilter, FamilyFilter, Page, RecordStore};
use crate::today;
use crate::warehouses::Warehouses;

pub type Reconciler = StockReconciler<Arc<Warehouses>>;

#[derive(Clone)]
pub struct DeliveryLedger {
    deliveries: Arc<dyn RecordStore<Delivery>>,
    families: Arc<dyn RecordStore<Family>>,
    reconciler: Reconciler,
}

impl DeliveryLedger {
    pub fn new(
        deliveries: Arc<dyn RecordStore<Delivery>>,
        families: Arc<dyn RecordStore<Family>>,
        warehouses: Arc<Warehouses>,
    ) -> Self {
        Self {
            deliveries,
            families,
            reconciler: StockReconciler::new(warehouses),
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    async fn family_summary(&self, family_id: FamilyId) -> DomainResult<FamilySummary> {
        self.families
            .get(&FamilyFilter::by_id(family_id))
            .await?
            .map(|f| f.summary())
            .ok_or_else(|| DomainError::not_found(format!("family {family_id}")))
    }

    pub async fn get(&self, id: DeliveryId) -> DomainResult<Delivery> {
        self.deliveries
            .get(&DeliveryFilter::by_id(id))
            .await?
            .ok_or_else(|| DomainError::not_found(format!("delivery {id}")))
    }

    pub async fn list(&self, filter: DeliveryFilter, page: Page) -> DomainResult<(Vec<Delivery>, u64)> {
        let items = self.deliveries.get_multi(&filter, page).await?;
        let total = self.deliveries.count(&filter).await?;
        Ok((items, total))
    }

    pub async fn for_family(&self, family_id: FamilyId) -> DomainResult<Vec<Delivery>> {
        Ok(self
            .deliveries
            .get_multi(&DeliveryFilter::for_family(family_id), Page::all())
            .await?)
    }

    #[instrument(skip(self, new), fields(family_id = %new.family_id, lines = new.lines.len()), err)]
    pub async fn create(&self, new: NewDelivery) -> DomainResult<Delivery> {
        let family_id = new.family_id;
        let mut delivery = Delivery::create(new, FamilySummary::default(), today())?;
        let summary = self.family_summary(family_id).await?;
        delivery.refresh_family(&summary);

        let lines = delivery.stock_lines();
        self.reconciler.reserve(&lines).await?;

        if let Err(e) = self.deliveries.create(delivery.clone()).await {
            error!(delivery_id = %delivery.id(), error = %e, "delivery not stored after reserving stock; releasing");
            if let Err(release) = self.reconciler.release(&lines).await {
                error!(delivery_id = %delivery.id(), error = %release, "reserved stock could not be released");
            }
            return Err(e.into());
        }
        info!(delivery_id = %delivery.id(), family_id = %family_id, "delivery created");
        Ok(delivery)
    }

    #[instrument(skip(self, patch), err)]
    pub async fn update(&self, id: DeliveryId, patch: DeliveryPatch) -> DomainResult<Delivery> {
        let current = self.get(id).await?;
        if let Err(e) = current.ensure_patchable(&patch) {
            warn!(delivery_id = %id, "update of a delivered delivery rejected");
            return Err(e);
        }
        let summary = match patch.family_id {
            Some(family_id) => Some(self.family_summary(family_id).await?),
            None => None,
        };
        let lines_changed = patch.lines.is_some();
        let mut next = current.clone();
        next.apply_patch(patch, summary, today())?;

        let moved = if lines_changed {
            self.reconciler
                .update_reserve(&current.stock_lines(), &next.stock_lines())
                .await?
        } else {
            StockPlan::default()
        };

        let stored = self
            .deliveries
            .replace(next, ExpectedVersion::Exact(current.version()))
            .await
            .map_err(DomainError::from)
            .and_then(|saved| saved.ok_or_else(|| DomainError::not_found(format!("delivery {id}"))));
        let saved = match stored {
            Ok(saved) => saved,
            Err(e) => {
                warn!(delivery_id = %id, error = %e, "delivery update not stored");
                self.revert_stock(id, &moved).await;
                return Err(e);
            }
        };
        info!(delivery_id = %id, state = ?saved.state(), "delivery updated");
        Ok(saved)
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&self, id: DeliveryId) -> DomainResult<()> {
        let current = self.get(id).await?;
        let released = if current.is_delivered() {
            StockPlan::default()
        } else {
            self.reconciler.release(&current.stock_lines()).await?
        };
        let deleted = self
            .deliveries
            .delete(&DeliveryFilter::by_id(id))
            .await
            .map_err(DomainError::from)
            .and_then(|outcome| match outcome.deleted_count {
                0 => Err(DomainError::not_found(format!("delivery {id}"))),
                _ => Ok(()),
            });
        if let Err(e) = deleted {
            warn!(delivery_id = %id, error = %e, "delivery not deleted");
            self.revert_stock(id, &released).await;
            return Err(e);
        }
        info!(delivery_id = %id, released = !current.is_delivered(), "delivery deleted");
        Ok(())
    }

    /// Best-effort undo of stock moved for a write that did not land.
    async fn revert_stock(&self, id: DeliveryId, plan: &StockPlan) {
        if plan.is_empty() {
            return;
        }
        match self.reconciler.revert(plan).await {
            Ok(_) => info!(delivery_id = %id, net_delta = -plan.net_delta(), "stock change reverted"),
            Err(e) => error!(delivery_id = %id, error = %e, "stock moved but could not be reverted"),
        }
    }
}

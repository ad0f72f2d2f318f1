//! Warehouse persistence with a product index, plus the warehouse CRUD service.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use almoner_core::{
    DomainError, DomainResult, Entity, ExpectedVersion, ProductId, WarehouseId,
};
use almoner_inventory::{NewProduct, Product, ProductPatch, Warehouse};

use crate::store::{
    BulkOp, BulkOutcome, DeleteOutcome, Page, RecordStore, StoreError, WarehouseFilter,
};
use crate::today;

/// Resolves a product id to the warehouse holding it.
#[async_trait]
pub trait ProductLocator: Send + Sync {
    async fn locate(&self, product_id: ProductId) -> Result<Option<WarehouseId>, StoreError>;
}

#[async_trait]
impl<L> ProductLocator for Arc<L>
where
    L: ProductLocator + ?Sized,
{
    async fn locate(&self, product_id: ProductId) -> Result<Option<WarehouseId>, StoreError> {
        (**self).locate(product_id).await
    }
}

/// Warehouse store decorator maintaining a `product id -> warehouse id` index.
///
/// Every write going through the repository updates the index after the
/// store accepted it. An index miss falls back to a store query and repairs
/// the entry.
#[derive(Debug)]
pub struct WarehouseRepository<S> {
    store: S,
    index: RwLock<HashMap<ProductId, WarehouseId>>,
}

impl<S> WarehouseRepository<S>
where
    S: RecordStore<Warehouse>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the index from every stored warehouse. Returns the number of indexed products.
    #[instrument(skip(self), err)]
    pub async fn rebuild_index(&self) -> Result<usize, StoreError> {
        let warehouses = self
            .store
            .get_multi(&WarehouseFilter::all(), Page::all())
            .await?;
        let mut fresh = HashMap::new();
        for w in &warehouses {
            for product_id in w.product_ids() {
                fresh.insert(product_id, w.id());
            }
        }
        let indexed = fresh.len();
        if let Ok(mut index) = self.index.write() {
            *index = fresh;
        }
        info!(warehouses = warehouses.len(), products = indexed, "product index rebuilt");
        Ok(indexed)
    }

    fn index_warehouse(&self, warehouse: &Warehouse) {
        if let Ok(mut index) = self.index.write() {
            let id = warehouse.id();
            index.retain(|_, w| *w != id);
            for product_id in warehouse.product_ids() {
                index.insert(product_id, id);
            }
        }
    }

    fn unindex_warehouse(&self, id: WarehouseId) {
        if let Ok(mut index) = self.index.write() {
            index.retain(|_, w| *w != id);
        }
    }

    fn indexed(&self, product_id: ProductId) -> Option<WarehouseId> {
        self.index.read().ok()?.get(&product_id).copied()
    }
}

#[async_trait]
impl<S> RecordStore<Warehouse> for WarehouseRepository<S>
where
    S: RecordStore<Warehouse>,
{
    async fn get(&self, filter: &WarehouseFilter) -> Result<Option<Warehouse>, StoreError> {
        self.store.get(filter).await
    }

    async fn get_multi(&self, filter: &WarehouseFilter, page: Page) -> Result<Vec<Warehouse>, StoreError> {
        self.store.get_multi(filter, page).await
    }

    async fn count(&self, filter: &WarehouseFilter) -> Result<u64, StoreError> {
        self.store.count(filter).await
    }

    async fn create(&self, record: Warehouse) -> Result<WarehouseId, StoreError> {
        let indexed = record.clone();
        let id = self.store.create(record).await?;
        self.index_warehouse(&indexed);
        Ok(id)
    }

    async fn replace(
        &self,
        record: Warehouse,
        expected: ExpectedVersion,
    ) -> Result<Option<Warehouse>, StoreError> {
        let stored = self.store.replace(record, expected).await?;
        if let Some(w) = &stored {
            self.index_warehouse(w);
        }
        Ok(stored)
    }

    async fn delete(&self, filter: &WarehouseFilter) -> Result<DeleteOutcome, StoreError> {
        let doomed = self.store.get_multi(filter, Page::all()).await?;
        let outcome = self.store.delete(filter).await?;
        for w in &doomed {
            self.unindex_warehouse(w.id());
        }
        Ok(outcome)
    }

    async fn bulk(&self, ops: Vec<BulkOp<Warehouse>>, ordered: bool) -> Result<BulkOutcome, StoreError> {
        let touched: BTreeSet<WarehouseId> = ops
            .iter()
            .map(|op| match op {
                BulkOp::Insert(w) | BulkOp::Replace { record: w, .. } => w.id(),
                BulkOp::Delete(id) => *id,
            })
            .collect();
        let outcome = self.store.bulk(ops, ordered).await?;

        // Re-read what actually landed rather than trusting the batch.
        let filter = WarehouseFilter {
            id_any: Some(touched.iter().copied().collect()),
            ..WarehouseFilter::default()
        };
        let current = self.store.get_multi(&filter, Page::all()).await?;
        for id in &touched {
            match current.iter().find(|w| w.id() == *id) {
                Some(w) => self.index_warehouse(w),
                None => self.unindex_warehouse(*id),
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl<S> ProductLocator for WarehouseRepository<S>
where
    S: RecordStore<Warehouse>,
{
    async fn locate(&self, product_id: ProductId) -> Result<Option<WarehouseId>, StoreError> {
        if let Some(id) = self.indexed(product_id) {
            return Ok(Some(id));
        }
        let found = self.store.get(&WarehouseFilter::holding(product_id)).await?;
        Ok(found.map(|w| {
            warn!(product_id = %product_id, warehouse_id = %w.id(), "product index miss repaired");
            self.index_warehouse(&w);
            w.id()
        }))
    }
}

/// Shared warehouse repository over a type-erased store.
pub type Warehouses = WarehouseRepository<Arc<dyn RecordStore<Warehouse>>>;

/// Warehouse and product CRUD.
#[derive(Clone)]
pub struct WarehouseService {
    warehouses: Arc<Warehouses>,
}

impl WarehouseService {
    pub fn new(warehouses: Arc<Warehouses>) -> Self {
        Self { warehouses }
    }

    pub async fn get(&self, id: WarehouseId) -> DomainResult<Warehouse> {
        self.warehouses
            .get(&WarehouseFilter::by_id(id))
            .await?
            .ok_or_else(|| DomainError::not_found(format!("warehouse {id}")))
    }

    pub async fn list(&self, page: Page) -> DomainResult<(Vec<Warehouse>, u64)> {
        let filter = WarehouseFilter::all();
        let items = self.warehouses.get_multi(&filter, page).await?;
        let total = self.warehouses.count(&filter).await?;
        Ok((items, total))
    }

    async fn ensure_name_free(&self, name: &str, except: Option<WarehouseId>) -> DomainResult<()> {
        let existing = self
            .warehouses
            .get(&WarehouseFilter::by_name(name.trim()))
            .await?;
        match existing {
            Some(w) if Some(w.id()) != except => Err(DomainError::conflict(format!(
                "warehouse '{}' already exists",
                w.name()
            ))),
            _ => Ok(()),
        }
    }

    async fn save(&self, warehouse: Warehouse) -> DomainResult<Warehouse> {
        let id = warehouse.id();
        let expected = ExpectedVersion::Exact(warehouse.version());
        self.warehouses
            .replace(warehouse, expected)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("warehouse {id}")))
    }

    #[instrument(skip(self), err)]
    pub async fn create(&self, name: String) -> DomainResult<Warehouse> {
        let warehouse = Warehouse::new(name)?;
        self.ensure_name_free(warehouse.name(), None).await?;
        self.warehouses.create(warehouse.clone()).await?;
        info!(warehouse_id = %warehouse.id(), name = warehouse.name(), "warehouse created");
        Ok(warehouse)
    }

    #[instrument(skip(self), err)]
    pub async fn rename(&self, id: WarehouseId, name: String) -> DomainResult<Warehouse> {
        let mut warehouse = self.get(id).await?;
        warehouse.rename(name)?;
        self.ensure_name_free(warehouse.name(), Some(id)).await?;
        self.save(warehouse).await
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&self, id: WarehouseId) -> DomainResult<()> {
        let outcome = self.warehouses.delete(&WarehouseFilter::by_id(id)).await?;
        if outcome.deleted_count == 0 {
            return Err(DomainError::not_found(format!("warehouse {id}")));
        }
        info!(warehouse_id = %id, "warehouse deleted");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn add_product(&self, id: WarehouseId, new: NewProduct) -> DomainResult<Product> {
        let mut warehouse = self.get(id).await?;
        let product_id = warehouse.add_product(new, today())?;
        let saved = self.save(warehouse).await?;
        let product = saved
            .product(product_id)
            .cloned()
            .ok_or_else(|| DomainError::internal(format!("product {product_id} lost on save")))?;
        info!(warehouse_id = %id, product_id = %product_id, quantity = product.quantity, "product added");
        Ok(product)
    }

    #[instrument(skip(self), err)]
    pub async fn update_product(
        &self,
        id: WarehouseId,
        product_id: ProductId,
        patch: ProductPatch,
    ) -> DomainResult<Product> {
        let mut warehouse = self.get(id).await?;
        let product = warehouse.update_product(product_id, patch, today())?.clone();
        self.save(warehouse).await?;
        info!(warehouse_id = %id, product_id = %product_id, "product updated");
        Ok(product)
    }

    #[instrument(skip(self), err)]
    pub async fn remove_product(&self, id: WarehouseId, product_id: ProductId) -> DomainResult<()> {
        let mut warehouse = self.get(id).await?;
        warehouse.remove_product(product_id)?;
        self.save(warehouse).await?;
        info!(warehouse_id = %id, product_id = %product_id, "product removed");
        Ok(())
    }
}

//! Stock reconciliation: apply validated quantity deltas to warehouses.
//!
//! Every mutation is plan / validate-all / apply-all: products are resolved
//! through the product index, each affected warehouse is loaded once, the
//! whole delta map is dry-run against them, and only then are the warehouses
//! written, each guarded by the version it was planned against.
//!
//! Writes to different warehouses are independent. A failure after some
//! warehouses were written is not compensated; it is logged with the applied
//! warehouse ids and surfaced as [`ReconcileError::Partial`].

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use almoner_core::{DomainError, Entity, ExpectedVersion, WarehouseId};
use almoner_inventory::{StockDeltas, StockError, StockLine, StockPlan, Warehouse};

use crate::store::{Page, RecordStore, StoreError, WarehouseFilter};
use crate::warehouses::ProductLocator;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Stock(#[from] StockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("stock applied to warehouses {applied:?} but failed on warehouse {failed}: {source}")]
    Partial {
        applied: Vec<WarehouseId>,
        failed: WarehouseId,
        #[source]
        source: StoreError,
    },
}

impl From<ReconcileError> for DomainError {
    fn from(value: ReconcileError) -> Self {
        match value {
            ReconcileError::Stock(e) => e.into(),
            ReconcileError::Store(e) => e.into(),
            ReconcileError::Partial { ref source, .. } => match source {
                StoreError::Concurrency(_) => DomainError::Conflict(value.to_string()),
                _ => DomainError::Internal(value.to_string()),
            },
        }
    }
}

/// Applies stock deltas through a warehouse store that can also locate products.
#[derive(Debug, Clone)]
pub struct StockReconciler<W> {
    warehouses: W,
}

impl<W> StockReconciler<W>
where
    W: RecordStore<Warehouse> + ProductLocator,
{
    pub fn new(warehouses: W) -> Self {
        Self { warehouses }
    }

    pub fn warehouses(&self) -> &W {
        &self.warehouses
    }

    /// Take stock for new delivery lines.
    pub async fn reserve(&self, lines: &[StockLine]) -> Result<StockPlan, ReconcileError> {
        self.apply(StockDeltas::reserve(lines)?).await
    }

    /// Move from the `old` commitment to the `new` one.
    ///
    /// Old lines whose product no longer exists are dropped; new lines must
    /// all resolve.
    pub async fn update_reserve(
        &self,
        old: &[StockLine],
        new: &[StockLine],
    ) -> Result<StockPlan, ReconcileError> {
        let old = self.held_lines(old).await?;
        self.apply(StockDeltas::update(&old, new)?).await
    }

    /// Return stock of cancelled lines. Lines of products that were removed
    /// (or whose warehouse was deleted) have nowhere to go and are skipped.
    pub async fn release(&self, lines: &[StockLine]) -> Result<StockPlan, ReconcileError> {
        let lines = self.held_lines(lines).await?;
        self.apply(StockDeltas::release(&lines)?).await
    }

    /// Undo a previously applied plan against current stock.
    pub async fn revert(&self, plan: &StockPlan) -> Result<StockPlan, ReconcileError> {
        self.apply(plan.reverted()).await
    }

    /// Lines whose product still resolves to a warehouse; the rest are logged and dropped.
    pub async fn held_lines(&self, lines: &[StockLine]) -> Result<Vec<StockLine>, ReconcileError> {
        let mut held = Vec::with_capacity(lines.len());
        for line in lines {
            if self.warehouses.locate(line.product_id).await?.is_some() {
                held.push(*line);
            } else {
                warn!(
                    product_id = %line.product_id,
                    quantity = line.quantity,
                    "product no longer stocked; its returned quantity is dropped"
                );
            }
        }
        Ok(held)
    }

    async fn affected_warehouses(&self, deltas: &StockDeltas) -> Result<Vec<Warehouse>, ReconcileError> {
        let mut ids = BTreeSet::new();
        for product_id in deltas.product_ids() {
            match self.warehouses.locate(product_id).await? {
                Some(id) => {
                    ids.insert(id);
                }
                None => return Err(StockError::ProductNotFound(product_id).into()),
            }
        }
        let filter = WarehouseFilter {
            id_any: Some(ids.into_iter().collect()),
            ..WarehouseFilter::default()
        };
        Ok(self.warehouses.get_multi(&filter, Page::all()).await?)
    }

    /// Validate every delta against current stock, then write each affected warehouse.
    #[instrument(skip(self, deltas), fields(products = deltas.product_ids().count()), err)]
    pub async fn apply(&self, deltas: StockDeltas) -> Result<StockPlan, ReconcileError> {
        if deltas.is_empty() {
            debug!("no stock changes to apply");
            return Ok(StockPlan::default());
        }

        let loaded = self.affected_warehouses(&deltas).await?;
        let plan = deltas.plan(&loaded).inspect_err(|e| {
            warn!(error = %e, "stock plan rejected");
        })?;
        debug!(
            warehouses = plan.changes().len(),
            net_delta = plan.net_delta(),
            "stock plan validated"
        );

        let mut by_id: HashMap<WarehouseId, Warehouse> =
            loaded.into_iter().map(|w| (w.id(), w)).collect();
        let mut applied: Vec<WarehouseId> = Vec::with_capacity(plan.changes().len());
        for change in plan.changes() {
            let id = change.warehouse_id;
            let mut warehouse = by_id.remove(&id).ok_or_else(|| {
                StoreError::Backend(format!("planned warehouse {id} was not loaded"))
            })?;
            warehouse.apply_change(change)?;

            let written = match self
                .warehouses
                .replace(warehouse, ExpectedVersion::Exact(change.expected_version))
                .await
            {
                Ok(Some(_)) => Ok(()),
                Ok(None) => Err(StoreError::Concurrency(format!(
                    "warehouse {id} was deleted during reconciliation"
                ))),
                Err(e) => Err(e),
            };

            if let Err(source) = written {
                if applied.is_empty() {
                    warn!(warehouse_id = %id, error = %source, "stock write rejected");
                    return Err(source.into());
                }
                error!(
                    applied = ?applied,
                    failed = %id,
                    error = %source,
                    "stock partially applied; earlier warehouse writes are not rolled back"
                );
                return Err(ReconcileError::Partial {
                    applied,
                    failed: id,
                    source,
                });
            }
            applied.push(id);
        }

        info!(
            warehouses = applied.len(),
            net_delta = plan.net_delta(),
            "stock applied"
        );
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use almoner_core::ProductId;
    use almoner_inventory::NewProduct;

    use super::*;
    use crate::store::{BulkOp, BulkOutcome, DeleteOutcome, InMemoryRecordStore};
    use crate::warehouses::{WarehouseRepository, Warehouses};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
    }

    fn product(name: &str, quantity: i64) -> NewProduct {
        NewProduct {
            name: name.to_string(),
            quantity,
            expiration_date: None,
        }
    }

    async fn seeded(stock: &[(&str, &[(&str, i64)])]) -> (Arc<Warehouses>, Vec<Vec<ProductId>>) {
        let store: Arc<dyn RecordStore<Warehouse>> = Arc::new(InMemoryRecordStore::<Warehouse>::new());
        let repo = Arc::new(WarehouseRepository::new(store));
        let mut ids = Vec::new();
        for (name, products) in stock {
            let mut w = Warehouse::new(*name).unwrap();
            let pids = products
                .iter()
                .map(|(n, q)| w.add_product(product(n, *q), today()).unwrap())
                .collect();
            repo.create(w).await.unwrap();
            ids.push(pids);
        }
        (repo, ids)
    }

    async fn quantity(repo: &Warehouses, product_id: ProductId) -> i64 {
        let w = repo
            .get(&WarehouseFilter::holding(product_id))
            .await
            .unwrap()
            .unwrap();
        w.product(product_id).unwrap().quantity
    }

    #[tokio::test]
    async fn reserve_then_release_restores_stock() {
        let (repo, ids) = seeded(&[("A", &[("Rice", 10)]), ("B", &[("Milk", 5)])]).await;
        let reconciler = StockReconciler::new(repo.clone());
        let lines = [StockLine::new(ids[0][0], 4), StockLine::new(ids[1][0], 5)];

        let plan = reconciler.reserve(&lines).await.unwrap();
        assert_eq!(plan.net_delta(), -9);
        assert_eq!(quantity(&repo, ids[0][0]).await, 6);
        assert_eq!(quantity(&repo, ids[1][0]).await, 0);

        reconciler.release(&lines).await.unwrap();
        assert_eq!(quantity(&repo, ids[0][0]).await, 10);
        assert_eq!(quantity(&repo, ids[1][0]).await, 5);
    }

    #[tokio::test]
    async fn insufficient_stock_in_any_warehouse_writes_nothing() {
        let (repo, ids) = seeded(&[("A", &[("Rice", 10)]), ("B", &[("Milk", 1)])]).await;
        let reconciler = StockReconciler::new(repo.clone());
        let lines = [StockLine::new(ids[0][0], 4), StockLine::new(ids[1][0], 2)];

        let err = reconciler.reserve(&lines).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Stock(StockError::InsufficientStock { .. })));
        assert_eq!(quantity(&repo, ids[0][0]).await, 10);
        assert_eq!(quantity(&repo, ids[1][0]).await, 1);
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let (repo, _) = seeded(&[("A", &[("Rice", 10)])]).await;
        let reconciler = StockReconciler::new(repo);
        let err = reconciler
            .reserve(&[StockLine::new(ProductId::new(), 1)])
            .await
            .unwrap_err();
        assert!(matches!(DomainError::from(err), DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn unchanged_update_issues_no_writes() {
        let (repo, ids) = seeded(&[("A", &[("Rice", 10)])]).await;
        let reconciler = StockReconciler::new(repo.clone());
        let lines = [StockLine::new(ids[0][0], 3)];
        let plan = reconciler.update_reserve(&lines, &lines).await.unwrap();
        assert!(plan.is_empty());

        let w = repo
            .get(&WarehouseFilter::holding(ids[0][0]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(w.version(), 0);
    }

    #[tokio::test]
    async fn release_skips_products_of_deleted_warehouses() {
        let (repo, ids) = seeded(&[("A", &[("Rice", 10)]), ("B", &[("Milk", 5)])]).await;
        let reconciler = StockReconciler::new(repo.clone());
        let lines = [StockLine::new(ids[0][0], 4), StockLine::new(ids[1][0], 2)];
        reconciler.reserve(&lines).await.unwrap();

        let gone = repo.locate(ids[1][0]).await.unwrap().unwrap();
        repo.delete(&WarehouseFilter::by_id(gone)).await.unwrap();

        let plan = reconciler.release(&lines).await.unwrap();
        assert_eq!(plan.net_delta(), 4);
        assert_eq!(quantity(&repo, ids[0][0]).await, 10);

        // A vanished product on the old side of an update is dropped too.
        let plan = reconciler
            .update_reserve(&[StockLine::new(ids[1][0], 2)], &[StockLine::new(ids[0][0], 3)])
            .await
            .unwrap();
        assert_eq!(plan.net_delta(), -3);
        assert_eq!(quantity(&repo, ids[0][0]).await, 7);
    }

    #[tokio::test]
    async fn revert_undoes_an_applied_plan() {
        let (repo, ids) = seeded(&[("A", &[("Rice", 10)]), ("B", &[("Milk", 5)])]).await;
        let reconciler = StockReconciler::new(repo.clone());
        let plan = reconciler
            .update_reserve(
                &[StockLine::new(ids[0][0], 2)],
                &[StockLine::new(ids[0][0], 5), StockLine::new(ids[1][0], 1)],
            )
            .await
            .unwrap();
        assert_eq!(quantity(&repo, ids[0][0]).await, 7);
        assert_eq!(quantity(&repo, ids[1][0]).await, 4);

        let undone = reconciler.revert(&plan).await.unwrap();
        assert_eq!(undone.net_delta(), -plan.net_delta());
        assert_eq!(quantity(&repo, ids[0][0]).await, 10);
        assert_eq!(quantity(&repo, ids[1][0]).await, 5);
    }

    /// Warehouse store whose replace fails for one chosen warehouse.
    struct FailingOn {
        inner: Arc<Warehouses>,
        fail: WarehouseId,
    }

    #[async_trait]
    impl RecordStore<Warehouse> for FailingOn {
        async fn get(&self, f: &WarehouseFilter) -> Result<Option<Warehouse>, StoreError> {
            self.inner.get(f).await
        }
        async fn get_multi(&self, f: &WarehouseFilter, p: Page) -> Result<Vec<Warehouse>, StoreError> {
            self.inner.get_multi(f, p).await
        }
        async fn count(&self, f: &WarehouseFilter) -> Result<u64, StoreError> {
            self.inner.count(f).await
        }
        async fn create(&self, r: Warehouse) -> Result<WarehouseId, StoreError> {
            self.inner.create(r).await
        }
        async fn replace(
            &self,
            r: Warehouse,
            e: ExpectedVersion,
        ) -> Result<Option<Warehouse>, StoreError> {
            if r.id() == self.fail {
                return Err(StoreError::Concurrency("simulated concurrent writer".into()));
            }
            self.inner.replace(r, e).await
        }
        async fn delete(&self, f: &WarehouseFilter) -> Result<DeleteOutcome, StoreError> {
            self.inner.delete(f).await
        }
        async fn bulk(&self, ops: Vec<BulkOp<Warehouse>>, o: bool) -> Result<BulkOutcome, StoreError> {
            self.inner.bulk(ops, o).await
        }
    }

    #[async_trait]
    impl ProductLocator for FailingOn {
        async fn locate(&self, p: ProductId) -> Result<Option<WarehouseId>, StoreError> {
            self.inner.locate(p).await
        }
    }

    #[tokio::test]
    async fn failure_after_first_warehouse_is_reported_as_partial() {
        let (repo, ids) = seeded(&[("A", &[("Rice", 10)]), ("B", &[("Milk", 5)])]).await;
        let a = repo.locate(ids[0][0]).await.unwrap().unwrap();
        let b = repo.locate(ids[1][0]).await.unwrap().unwrap();
        // Warehouses are written in id order; fail on the later one.
        let (first_product, fail) = if a < b { (ids[0][0], b) } else { (ids[1][0], a) };
        let before = quantity(&repo, first_product).await;
        let reconciler = StockReconciler::new(FailingOn {
            inner: repo.clone(),
            fail,
        });

        let err = reconciler
            .reserve(&[StockLine::new(ids[0][0], 1), StockLine::new(ids[1][0], 1)])
            .await
            .unwrap_err();
        match &err {
            ReconcileError::Partial { applied, failed, .. } => {
                assert_eq!(applied.len(), 1);
                assert_eq!(*failed, fail);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
        assert!(matches!(DomainError::from(err), DomainError::Conflict(_)));
        // The first warehouse keeps its write.
        assert_eq!(quantity(&repo, first_product).await, before - 1);
    }
}

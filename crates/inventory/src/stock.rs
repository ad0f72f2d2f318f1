//! Stock planning: turn delivery lines into per-product deltas, validate every
//! affected product against current warehouse state, and produce the complete
//! replacement product list for each affected warehouse.
//!
//! Planning never writes. Callers apply a [`StockPlan`] only after it has been
//! computed successfully, so a rejected request leaves every warehouse intact.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use almoner_core::{DomainError, Entity, ProductId, WarehouseId};

use crate::warehouse::{Product, Warehouse};

/// A product reference with a quantity, as carried by a delivery line.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl StockLine {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    #[error("product {0} not found in any warehouse")]
    ProductNotFound(ProductId),

    #[error("product {0} appears in more than one line")]
    DuplicateLine(ProductId),

    #[error("quantity for product {product_id} must be positive (got {quantity})")]
    InvalidQuantity { product_id: ProductId, quantity: i64 },

    #[error(
        "insufficient stock for product {product_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        requested: i64,
    },

    #[error("stock change planned for warehouse {found} applied to warehouse {expected}")]
    WarehouseMismatch {
        expected: WarehouseId,
        found: WarehouseId,
    },
}

impl From<StockError> for DomainError {
    fn from(value: StockError) -> Self {
        match value {
            StockError::ProductNotFound(_) => DomainError::NotFound(value.to_string()),
            StockError::WarehouseMismatch { .. } => DomainError::Internal(value.to_string()),
            _ => DomainError::BadRequest(value.to_string()),
        }
    }
}

/// Signed per-product quantity changes, accumulated before validation.
///
/// Negative deltas consume stock, positive deltas return it. Entries for the
/// same product are summed so the final check sees the net change only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockDeltas {
    deltas: BTreeMap<ProductId, i64>,
}

impl StockDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, product_id: ProductId, delta: i64) {
        *self.deltas.entry(product_id).or_insert(0) += delta;
    }

    /// Deltas consuming stock for new commitments.
    pub fn reserve(lines: &[StockLine]) -> Result<Self, StockError> {
        ensure_valid_lines(lines)?;
        let mut deltas = Self::new();
        for line in lines {
            deltas.add(line.product_id, -line.quantity);
        }
        Ok(deltas)
    }

    /// Deltas returning stock for cancelled commitments.
    pub fn release(lines: &[StockLine]) -> Result<Self, StockError> {
        ensure_positive(lines)?;
        let mut deltas = Self::new();
        for line in lines {
            deltas.add(line.product_id, line.quantity);
        }
        Ok(deltas)
    }

    /// Deltas moving from the `old` commitment to the `new` one:
    /// `old_quantity - new_quantity` for every product on either side.
    pub fn update(old: &[StockLine], new: &[StockLine]) -> Result<Self, StockError> {
        ensure_valid_lines(new)?;
        let mut deltas = Self::new();
        for line in old {
            deltas.add(line.product_id, line.quantity);
        }
        for line in new {
            deltas.add(line.product_id, -line.quantity);
        }
        Ok(deltas)
    }

    pub fn merge(&mut self, other: StockDeltas) {
        for (product_id, delta) in other.deltas {
            self.add(product_id, delta);
        }
    }

    pub fn get(&self, product_id: ProductId) -> i64 {
        self.deltas.get(&product_id).copied().unwrap_or(0)
    }

    /// Products whose net delta is non-zero.
    pub fn product_ids(&self) -> impl Iterator<Item = ProductId> + '_ {
        self.iter().map(|(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProductId, i64)> + '_ {
        self.deltas
            .iter()
            .filter(|(_, d)| **d != 0)
            .map(|(id, d)| (*id, *d))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Sum of every delta.
    pub fn net(&self) -> i64 {
        self.deltas.values().sum()
    }

    /// Dry-run the deltas against `warehouses`.
    ///
    /// Every product must live in one of the supplied warehouses and no
    /// resulting quantity may be negative. Unaffected products and warehouses
    /// are left out of the plan.
    pub fn plan(&self, warehouses: &[Warehouse]) -> Result<StockPlan, StockError> {
        let mut location: HashMap<ProductId, (usize, usize)> = HashMap::new();
        for (w_idx, warehouse) in warehouses.iter().enumerate() {
            for (p_idx, product) in warehouse.products().iter().enumerate() {
                location.insert(product.id, (w_idx, p_idx));
            }
        }

        let mut per_warehouse: BTreeMap<usize, Vec<Adjustment>> = BTreeMap::new();
        for (product_id, delta) in self.iter() {
            let (w_idx, p_idx) = *location
                .get(&product_id)
                .ok_or(StockError::ProductNotFound(product_id))?;
            let before = warehouses[w_idx].products()[p_idx].quantity;
            let after = before + delta;
            if after < 0 {
                return Err(StockError::InsufficientStock {
                    product_id,
                    available: before,
                    requested: -delta,
                });
            }
            per_warehouse.entry(w_idx).or_default().push(Adjustment {
                product_id,
                before,
                after,
            });
        }

        let changes = per_warehouse
            .into_iter()
            .map(|(w_idx, adjustments)| {
                let warehouse = &warehouses[w_idx];
                let products: Vec<Product> = warehouse
                    .products()
                    .iter()
                    .map(|p| {
                        let mut p = p.clone();
                        if let Some(adj) = adjustments.iter().find(|a| a.product_id == p.id) {
                            p.quantity = adj.after;
                        }
                        p
                    })
                    .collect();
                WarehouseChange {
                    warehouse_id: warehouse.id(),
                    expected_version: warehouse.version(),
                    products,
                    adjustments,
                }
            })
            .collect();

        Ok(StockPlan { changes })
    }
}

fn ensure_positive(lines: &[StockLine]) -> Result<(), StockError> {
    match lines.iter().find(|l| l.quantity <= 0) {
        Some(line) => Err(StockError::InvalidQuantity {
            product_id: line.product_id,
            quantity: line.quantity,
        }),
        None => Ok(()),
    }
}

fn ensure_valid_lines(lines: &[StockLine]) -> Result<(), StockError> {
    ensure_positive(lines)?;
    let mut seen = std::collections::HashSet::with_capacity(lines.len());
    for line in lines {
        if !seen.insert(line.product_id) {
            return Err(StockError::DuplicateLine(line.product_id));
        }
    }
    Ok(())
}

/// One product's quantity before and after a plan.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct Adjustment {
    pub product_id: ProductId,
    pub before: i64,
    pub after: i64,
}

impl Adjustment {
    pub fn delta(&self) -> i64 {
        self.after - self.before
    }
}

/// The complete replacement product list for one warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseChange {
    pub warehouse_id: WarehouseId,
    /// Version of the warehouse the plan was computed against.
    pub expected_version: u64,
    pub products: Vec<Product>,
    pub adjustments: Vec<Adjustment>,
}

/// Validated stock changes, grouped by warehouse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockPlan {
    changes: Vec<WarehouseChange>,
}

impl StockPlan {
    pub fn changes(&self) -> &[WarehouseChange] {
        &self.changes
    }

    pub fn into_changes(self) -> Vec<WarehouseChange> {
        self.changes
    }

    pub fn adjustments(&self) -> impl Iterator<Item = &Adjustment> {
        self.changes.iter().flat_map(|c| c.adjustments.iter())
    }

    pub fn net_delta(&self) -> i64 {
        self.adjustments().map(Adjustment::delta).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Deltas undoing every adjustment of this plan.
    pub fn reverted(&self) -> StockDeltas {
        let mut deltas = StockDeltas::new();
        for adjustment in self.adjustments() {
            deltas.add(adjustment.product_id, -adjustment.delta());
        }
        deltas
    }
}

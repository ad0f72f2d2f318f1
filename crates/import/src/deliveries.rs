//! Deliveries sheet: one row per line, grouped by the `delivery` column.
//!
//! A delivery is identified by its family and delivery date. Stock for the
//! whole sheet is accumulated into one delta map and applied before the
//! delivery batches are written.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use tracing::{error, info, instrument};

use almoner_beneficiaries::{Family, FamilySummary, normalize_national_id};
use almoner_core::{DomainError, Entity, FamilyId, ProductId};
use almoner_deliveries::{Delivery, DeliveryLine, DeliveryState, NewDelivery};
use almoner_infra::Reconciler;
use almoner_infra::store::{DeliveryFilter, FamilyFilter, Page, RecordStore, WarehouseFilter};
use almoner_inventory::{StockDeltas, Warehouse};

use crate::error::{ImportError, RowError};
use crate::plan::{ImportKind, ImportReport, Keyed, ensure_unique, partition, submit};
use crate::schema::{Schema, optional, required};
use crate::sheet::Sheet;

pub const SCHEMA: Schema = Schema {
    columns: &[
        required("delivery"),
        required("family_head_id"),
        required("delivery_date"),
        required("months"),
        optional("state"),
        required("warehouse"),
        required("product"),
        required("quantity"),
        optional("status"),
    ],
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct LineRow {
    row: usize,
    group: String,
    head_national_id: String,
    delivery_date: NaiveDate,
    months: u32,
    state: Option<DeliveryState>,
    warehouse: String,
    product: String,
    quantity: i64,
    status: Option<String>,
}

/// One `delivery` group: delivery-level fields from its first row plus every line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryGroup {
    pub name: String,
    pub row: usize,
    pub head_national_id: String,
    pub delivery_date: NaiveDate,
    pub months: u32,
    pub state: Option<DeliveryState>,
    pub lines: Vec<GroupLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLine {
    pub row: usize,
    pub warehouse: String,
    pub product: String,
    pub quantity: i64,
    pub status: Option<String>,
}

/// Natural key of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryKey {
    pub family_id: FamilyId,
    pub delivery_date: NaiveDate,
}

impl fmt::Display for DeliveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "family {} on {}", self.family_id, self.delivery_date)
    }
}

pub fn parse(sheet: &Sheet) -> Result<Vec<DeliveryGroup>, ImportError> {
    let rows = SCHEMA.parse_rows(sheet, |row| {
        let group = row.required_text("delivery");
        let head = normalize_national_id(row.text("family_head_id").as_deref());
        let delivery_date = row.date("delivery_date");
        let months = row.number_of::<u32>("months");
        if months == Some(0) {
            row.error("months must be at least 1");
        }
        let state = row.parse("state");
        let warehouse = row.required_text("warehouse");
        let product = row.required_text("product");
        let quantity = row.number_of::<i64>("quantity");
        if quantity.is_some_and(|q| q <= 0) {
            row.error("quantity must be positive");
        }
        Some(LineRow {
            row: row.number(),
            group,
            head_national_id: head?,
            delivery_date: delivery_date?,
            months: months?,
            state,
            warehouse,
            product,
            quantity: quantity?,
            status: row.text("status"),
        })
    })?;

    let mut groups: Vec<DeliveryGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut invalid: Vec<RowError> = Vec::new();
    for line in rows {
        let position = *index.entry(line.group.clone()).or_insert_with(|| {
            groups.push(DeliveryGroup {
                name: line.group.clone(),
                row: line.row,
                head_national_id: line.head_national_id.clone(),
                delivery_date: line.delivery_date,
                months: line.months,
                state: line.state,
                lines: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[position];
        let mut mismatches = Vec::new();
        if line.head_national_id != group.head_national_id {
            mismatches.push("family_head_id");
        }
        if line.delivery_date != group.delivery_date {
            mismatches.push("delivery_date");
        }
        if line.months != group.months {
            mismatches.push("months");
        }
        if line.state.is_some() && line.state != group.state {
            mismatches.push("state");
        }
        if line.product_repeats(group) {
            invalid.push(RowError {
                row: line.row,
                errors: vec![format!(
                    "product '{}' of warehouse '{}' appears twice in delivery '{}'",
                    line.product, line.warehouse, group.name
                )],
            });
        }
        if !mismatches.is_empty() {
            invalid.push(RowError {
                row: line.row,
                errors: mismatches
                    .into_iter()
                    .map(|field| format!("{field} differs from row {} of delivery '{}'", group.row, group.name))
                    .collect(),
            });
        }
        group.lines.push(GroupLine {
            row: line.row,
            warehouse: line.warehouse,
            product: line.product,
            quantity: line.quantity,
            status: line.status,
        });
    }
    if invalid.is_empty() {
        Ok(groups)
    } else {
        Err(ImportError::InvalidRows(invalid))
    }
}

impl LineRow {
    fn product_repeats(&self, group: &DeliveryGroup) -> bool {
        group
            .lines
            .iter()
            .any(|l| l.warehouse == self.warehouse && l.product == self.product)
    }
}

/// Lookups resolving sheet references to stored records.
struct References {
    families: HashMap<String, Family>,
    warehouses: HashMap<String, Warehouse>,
}

impl References {
    async fn load(
        groups: &[DeliveryGroup],
        families: &dyn RecordStore<Family>,
        warehouses: &Reconciler,
    ) -> Result<Self, ImportError> {
        let family_filter = FamilyFilter {
            head_national_id_any: Some(groups.iter().map(|g| g.head_national_id.clone()).collect()),
            ..FamilyFilter::default()
        };
        let families = families
            .get_multi(&family_filter, Page::all())
            .await?
            .into_iter()
            .filter_map(|f| Some((f.head()?.national_id.clone()?, f)))
            .collect();

        let mut names: Vec<String> = groups
            .iter()
            .flat_map(|g| g.lines.iter().map(|l| l.warehouse.clone()))
            .collect();
        names.sort();
        names.dedup();
        let warehouse_filter = WarehouseFilter {
            name_any: Some(names),
            ..WarehouseFilter::default()
        };
        let warehouses = warehouses
            .warehouses()
            .get_multi(&warehouse_filter, Page::all())
            .await?
            .into_iter()
            .map(|w| (w.name().to_string(), w))
            .collect();
        Ok(Self {
            families,
            warehouses,
        })
    }

    fn family(&self, group: &DeliveryGroup) -> Result<&Family, ImportError> {
        self.families.get(&group.head_national_id).ok_or_else(|| {
            ImportError::NotFound(format!(
                "family with head national id {} (row {})",
                group.head_national_id, group.row
            ))
        })
    }

    fn product(&self, line: &GroupLine) -> Result<ProductId, ImportError> {
        let warehouse = self.warehouses.get(&line.warehouse).ok_or_else(|| {
            ImportError::NotFound(format!("warehouse '{}' (row {})", line.warehouse, line.row))
        })?;
        warehouse
            .product_by_name(&line.product)
            .map(|p| p.id)
            .ok_or_else(|| {
                ImportError::NotFound(format!(
                    "product '{}' in warehouse '{}' (row {})",
                    line.product, line.warehouse, line.row
                ))
            })
    }

    fn candidate(
        &self,
        group: DeliveryGroup,
    ) -> Result<Keyed<DeliveryKey, (NewDelivery, FamilySummary)>, ImportError> {
        let family = self.family(&group)?;
        let lines = group
            .lines
            .iter()
            .map(|line| {
                Ok(DeliveryLine {
                    product_id: self.product(line)?,
                    quantity: line.quantity,
                    status: line.status.clone(),
                })
            })
            .collect::<Result<Vec<_>, ImportError>>()?;
        Ok(Keyed {
            key: DeliveryKey {
                family_id: family.id(),
                delivery_date: group.delivery_date,
            },
            row: group.row,
            candidate: (
                NewDelivery {
                    delivery_date: group.delivery_date,
                    months: group.months,
                    lines,
                    family_id: family.id(),
                    state: group.state,
                },
                family.summary(),
            ),
        })
    }
}

#[instrument(skip_all, fields(rows = sheet.rows().len()), err)]
pub async fn import(
    deliveries: &dyn RecordStore<Delivery>,
    families: &dyn RecordStore<Family>,
    reconciler: &Reconciler,
    sheet: &Sheet,
) -> Result<ImportReport, ImportError> {
    let groups = parse(sheet)?;
    let references = References::load(&groups, families, reconciler).await?;
    let candidates = groups
        .into_iter()
        .map(|g| references.candidate(g))
        .collect::<Result<Vec<_>, _>>()?;
    ensure_unique(&candidates, "delivery")?;

    let filter = DeliveryFilter {
        family_id_any: Some(candidates.iter().map(|k| k.key.family_id).collect()),
        ..DeliveryFilter::default()
    };
    let mut existing: HashMap<DeliveryKey, Delivery> = HashMap::new();
    for d in deliveries.get_multi(&filter, Page::all()).await? {
        let key = DeliveryKey {
            family_id: d.family_id(),
            delivery_date: d.delivery_date(),
        };
        existing.entry(key).or_insert(d);
    }
    let plan = partition(candidates, existing);

    let mut deltas = StockDeltas::new();
    let mut inserts = Vec::with_capacity(plan.inserts.len());
    let mut insert_deltas = Vec::with_capacity(plan.inserts.len());
    for keyed in plan.inserts {
        let (new, summary) = keyed.candidate;
        let delivery = Delivery::import(new, summary)?;
        let reserved = StockDeltas::reserve(&delivery.stock_lines())?;
        deltas.merge(reserved.clone());
        insert_deltas.push(reserved);
        inserts.push(delivery);
    }
    let mut updates = Vec::with_capacity(plan.updates.len());
    let mut update_deltas = Vec::with_capacity(plan.updates.len());
    for (mut stored, keyed) in plan.updates {
        let (new, summary) = keyed.candidate;
        let old_lines = reconciler.held_lines(&stored.stock_lines()).await?;
        stored
            .overwrite_from_import(new, summary)
            .map_err(|e| match e {
                DomainError::Conflict(msg) => ImportError::Conflict(format!("row {}: {msg}", keyed.row)),
                other => ImportError::Domain(other),
            })?;
        let moved = StockDeltas::update(&old_lines, &stored.stock_lines())?;
        deltas.merge(moved.clone());
        update_deltas.push(moved);
        updates.push(stored);
    }

    let plan = reconciler.apply(deltas).await?;
    info!(
        warehouses = plan.changes().len(),
        net_delta = plan.net_delta(),
        "import stock applied"
    );

    let submitted = submit(deliveries, inserts, updates).await?;
    let mut unwritten = StockDeltas::new();
    for index in &submitted.rejected_inserts {
        if let Some(d) = insert_deltas.get(*index) {
            unwritten.merge(d.clone());
        }
    }
    for index in &submitted.rejected_updates {
        if let Some(d) = update_deltas.get(*index) {
            unwritten.merge(d.clone());
        }
    }
    return_unwritten(reconciler, unwritten).await;

    Ok(ImportReport {
        inserted: submitted.inserted,
        updated: submitted.updated,
        failed: submitted.failed,
        ..ImportReport::new(ImportKind::Deliveries)
    })
}

/// Best-effort undo of the stock taken for deliveries the store rejected.
async fn return_unwritten(reconciler: &Reconciler, unwritten: StockDeltas) {
    if unwritten.is_empty() {
        return;
    }
    let mut inverse = StockDeltas::new();
    for (product_id, delta) in unwritten.iter() {
        inverse.add(product_id, -delta);
    }
    match reconciler.apply(inverse).await {
        Ok(plan) => info!(net_delta = plan.net_delta(), "stock of rejected deliveries returned"),
        Err(e) => error!(error = %e, "stock of rejected deliveries could not be returned"),
    }
}

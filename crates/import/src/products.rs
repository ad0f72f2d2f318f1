//! Products sheet, keyed by (`warehouse`, `name`). Each touched warehouse
//! gets one wholesale product-list replace.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::NaiveDate;
use tracing::{instrument, warn};

use almoner_core::ExpectedVersion;
use almoner_infra::Warehouses;
use almoner_infra::store::{BulkOp, Page, RecordStore, WarehouseFilter};
use almoner_inventory::{NewProduct, Warehouse};

use crate::error::{ImportError, at_row};
use crate::plan::{ImportKind, ImportReport, Keyed, ensure_unique};
use crate::schema::{Schema, optional, required};
use crate::sheet::Sheet;

pub const SCHEMA: Schema = Schema {
    columns: &[
        required("warehouse"),
        required("name"),
        required("quantity"),
        optional("expiration_date"),
    ],
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductKey {
    pub warehouse: String,
    pub name: String,
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.warehouse, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductRow {
    pub quantity: i64,
    pub expiration_date: Option<NaiveDate>,
}

pub fn parse(sheet: &Sheet) -> Result<Vec<Keyed<ProductKey, ProductRow>>, ImportError> {
    let rows = SCHEMA.parse_rows(sheet, |row| {
        let warehouse = row.required_text("warehouse");
        let name = row.required_text("name");
        let quantity = row.number_of::<i64>("quantity");
        if quantity.is_some_and(|q| q < 0) {
            row.error("quantity cannot be negative");
        }
        let expiration_date = row.date("expiration_date");
        Some(Keyed {
            key: ProductKey { warehouse, name },
            row: row.number(),
            candidate: ProductRow {
                quantity: quantity?,
                expiration_date,
            },
        })
    })?;
    ensure_unique(&rows, "product")?;
    Ok(rows)
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    inserted: u64,
    updated: u64,
}

#[instrument(skip(warehouses, sheet), fields(rows = sheet.rows().len()), err)]
pub async fn import(
    warehouses: &Warehouses,
    sheet: &Sheet,
    today: NaiveDate,
) -> Result<ImportReport, ImportError> {
    let rows = parse(sheet)?;

    let mut by_warehouse: BTreeMap<String, Vec<Keyed<ProductKey, ProductRow>>> = BTreeMap::new();
    for keyed in rows {
        by_warehouse
            .entry(keyed.key.warehouse.clone())
            .or_default()
            .push(keyed);
    }
    let filter = WarehouseFilter {
        name_any: Some(by_warehouse.keys().cloned().collect()),
        ..WarehouseFilter::default()
    };
    let mut stored: HashMap<String, Warehouse> = warehouses
        .get_multi(&filter, Page::all())
        .await?
        .into_iter()
        .map(|w| (w.name().to_string(), w))
        .collect();

    let mut ops = Vec::with_capacity(by_warehouse.len());
    let mut counts = Vec::with_capacity(by_warehouse.len());
    for (name, products) in by_warehouse {
        let first_row = products.first().map(|k| k.row).unwrap_or_default();
        let mut warehouse = stored.remove(&name).ok_or_else(|| {
            ImportError::NotFound(format!("warehouse '{name}' (row {first_row})"))
        })?;
        let expected = ExpectedVersion::Exact(warehouse.version());
        let mut count = Counts::default();
        for keyed in products {
            let existing = warehouse.product_by_name(&keyed.key.name).map(|p| p.id);
            let row = keyed.row;
            match existing {
                Some(product_id) => {
                    warehouse
                        .restock(
                            product_id,
                            keyed.candidate.quantity,
                            keyed.candidate.expiration_date,
                            today,
                        )
                        .map_err(|e| at_row(row, e))?;
                    count.updated += 1;
                }
                None => {
                    warehouse
                        .add_product(
                            NewProduct {
                                name: keyed.key.name,
                                quantity: keyed.candidate.quantity,
                                expiration_date: keyed.candidate.expiration_date,
                            },
                            today,
                        )
                        .map_err(|e| at_row(row, e))?;
                    count.inserted += 1;
                }
            }
        }
        ops.push(BulkOp::Replace {
            record: warehouse,
            expected,
        });
        counts.push(count);
    }

    let outcome = warehouses.bulk(ops, false).await?;
    outcome.ensure_acknowledged()?;
    let mut report = ImportReport::new(ImportKind::Products);
    for (index, count) in counts.into_iter().enumerate() {
        if let Some(failure) = outcome.failures.iter().find(|f| f.index == index) {
            warn!(index, error = %failure.error, "warehouse product import failed");
            report.failed += count.inserted + count.updated;
        } else {
            report.inserted += count.inserted;
            report.updated += count.updated;
        }
    }
    Ok(report)
}

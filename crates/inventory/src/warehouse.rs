use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use almoner_core::{DomainError, DomainResult, Entity, ProductId, WarehouseId};

use crate::stock::{StockError, WarehouseChange};

/// A product held by exactly one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Units on hand. Never negative once persisted.
    pub quantity: i64,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
}

/// Input for adding a product to a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub quantity: i64,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
}

/// Partial product update: `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub expiration_date: Option<NaiveDate>,
}

/// Warehouse record: a uniquely named holder of an ordered product list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    id: WarehouseId,
    name: String,
    #[serde(default)]
    products: Vec<Product>,
    #[serde(default)]
    version: u64,
}

impl Warehouse {
    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = validate_name("warehouse name", name.into())?;
        Ok(Self {
            id: WarehouseId::new(),
            name,
            products: Vec::new(),
            version: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn product(&self, product_id: ProductId) -> Option<&Product> {
        self.products.iter().find(|p| p.id == product_id)
    }

    pub fn product_by_name(&self, name: &str) -> Option<&Product> {
        let name = name.trim();
        self.products.iter().find(|p| p.name == name)
    }

    pub fn product_ids(&self) -> impl Iterator<Item = ProductId> + '_ {
        self.products.iter().map(|p| p.id)
    }

    pub fn rename(&mut self, name: impl Into<String>) -> DomainResult<()> {
        self.name = validate_name("warehouse name", name.into())?;
        Ok(())
    }

    /// Add a product; names are unique within the warehouse.
    pub fn add_product(&mut self, new: NewProduct, today: NaiveDate) -> DomainResult<ProductId> {
        let name = validate_name("product name", new.name)?;
        if self.product_by_name(&name).is_some() {
            return Err(DomainError::conflict(format!(
                "product '{name}' already exists in warehouse '{}'",
                self.name
            )));
        }
        validate_quantity(new.quantity)?;
        validate_expiration(new.expiration_date, today)?;

        let id = ProductId::new();
        self.products.push(Product {
            id,
            name,
            quantity: new.quantity,
            expiration_date: new.expiration_date,
        });
        Ok(id)
    }

    /// Merge the non-null fields of `patch` into an existing product.
    pub fn update_product(
        &mut self,
        product_id: ProductId,
        patch: ProductPatch,
        today: NaiveDate,
    ) -> DomainResult<&Product> {
        let renamed = match patch.name {
            Some(name) => {
                let name = validate_name("product name", name)?;
                if self
                    .products
                    .iter()
                    .any(|p| p.id != product_id && p.name == name)
                {
                    return Err(DomainError::conflict(format!(
                        "product '{name}' already exists in warehouse '{}'",
                        self.name
                    )));
                }
                Some(name)
            }
            None => None,
        };
        if let Some(quantity) = patch.quantity {
            validate_quantity(quantity)?;
        }
        validate_expiration(patch.expiration_date, today)?;

        let product = self
            .products
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;

        if let Some(name) = renamed {
            product.name = name;
        }
        if let Some(quantity) = patch.quantity {
            product.quantity = quantity;
        }
        if patch.expiration_date.is_some() {
            product.expiration_date = patch.expiration_date;
        }
        Ok(product)
    }

    /// Replace quantity and expiry of an existing product; a `None` expiry clears it.
    pub fn restock(
        &mut self,
        product_id: ProductId,
        quantity: i64,
        expiration_date: Option<NaiveDate>,
        today: NaiveDate,
    ) -> DomainResult<&Product> {
        validate_quantity(quantity)?;
        validate_expiration(expiration_date, today)?;
        let product = self
            .products
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;
        product.quantity = quantity;
        product.expiration_date = expiration_date;
        Ok(product)
    }

    pub fn remove_product(&mut self, product_id: ProductId) -> DomainResult<Product> {
        let idx = self
            .products
            .iter()
            .position(|p| p.id == product_id)
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;
        Ok(self.products.remove(idx))
    }

    /// Replace the product list with the one computed by a stock plan.
    pub fn apply_change(&mut self, change: &WarehouseChange) -> Result<(), StockError> {
        if change.warehouse_id != self.id {
            return Err(StockError::WarehouseMismatch {
                expected: self.id,
                found: change.warehouse_id,
            });
        }
        self.products = change.products.clone();
        Ok(())
    }
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> WarehouseId {
        self.id
    }
}

fn validate_name(what: &str, name: String) -> DomainResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::bad_request(format!("{what} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

fn validate_quantity(quantity: i64) -> DomainResult<()> {
    if quantity < 0 {
        return Err(DomainError::bad_request(format!(
            "quantity cannot be negative (got {quantity})"
        )));
    }
    Ok(())
}

fn validate_expiration(date: Option<NaiveDate>, today: NaiveDate) -> DomainResult<()> {
    match date {
        Some(d) if d <= today => Err(DomainError::bad_request(format!(
            "expiration date {d} must be in the future"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
    }

    fn rice(quantity: i64) -> NewProduct {
        NewProduct {
            name: "Rice".to_string(),
            quantity,
            expiration_date: None,
        }
    }

    #[test]
    fn new_rejects_blank_name() {
        let err = Warehouse::new("   ").unwrap_err();
        assert!(matches!(err, DomainError::BadRequest(_)));
    }

    #[test]
    fn add_product_trims_and_stores_quantity() {
        let mut w = Warehouse::new(" Central ").unwrap();
        let id = w
            .add_product(
                NewProduct {
                    name: "  Rice ".to_string(),
                    quantity: 10,
                    expiration_date: None,
                },
                today(),
            )
            .unwrap();
        assert_eq!(w.name(), "Central");
        let p = w.product(id).unwrap();
        assert_eq!(p.name, "Rice");
        assert_eq!(p.quantity, 10);
    }

    #[test]
    fn restock_replaces_quantity_and_clears_expiry() {
        let mut w = Warehouse::new("Central").unwrap();
        let mut p = rice(3);
        p.expiration_date = NaiveDate::from_ymd_opt(2026, 6, 1);
        let id = w.add_product(p, today()).unwrap();

        let restocked = w.restock(id, 8, None, today()).unwrap();
        assert_eq!(restocked.quantity, 8);
        assert_eq!(restocked.expiration_date, None);

        assert!(matches!(w.restock(id, -1, None, today()), Err(DomainError::BadRequest(_))));
        assert!(matches!(
            w.restock(ProductId::new(), 1, None, today()),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn add_product_rejects_duplicate_name() {
        let mut w = Warehouse::new("Central").unwrap();
        w.add_product(rice(1), today()).unwrap();
        let err = w.add_product(rice(5), today()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(w.products().len(), 1);
    }

    #[test]
    fn add_product_rejects_negative_quantity() {
        let mut w = Warehouse::new("Central").unwrap();
        let err = w.add_product(rice(-1), today()).unwrap_err();
        assert!(matches!(err, DomainError::BadRequest(_)));
    }

    #[test]
    fn add_product_rejects_past_expiration() {
        let mut w = Warehouse::new("Central").unwrap();
        let mut p = rice(3);
        p.expiration_date = Some(today());
        let err = w.add_product(p, today()).unwrap_err();
        assert!(matches!(err, DomainError::BadRequest(msg) if msg.contains("future")));
    }

    #[test]
    fn update_product_merges_only_provided_fields() {
        let mut w = Warehouse::new("Central").unwrap();
        let id = w.add_product(rice(10), today()).unwrap();
        let later = today().succ_opt().unwrap();

        let updated = w
            .update_product(
                id,
                ProductPatch {
                    quantity: Some(4),
                    expiration_date: Some(later),
                    ..ProductPatch::default()
                },
                today(),
            )
            .unwrap();
        assert_eq!(updated.name, "Rice");
        assert_eq!(updated.quantity, 4);
        assert_eq!(updated.expiration_date, Some(later));
    }

    #[test]
    fn update_product_rejects_rename_onto_existing_name() {
        let mut w = Warehouse::new("Central").unwrap();
        w.add_product(rice(1), today()).unwrap();
        let beans = w
            .add_product(
                NewProduct {
                    name: "Beans".to_string(),
                    quantity: 1,
                    expiration_date: None,
                },
                today(),
            )
            .unwrap();
        let err = w
            .update_product(
                beans,
                ProductPatch {
                    name: Some("Rice".to_string()),
                    ..ProductPatch::default()
                },
                today(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn remove_unknown_product_is_not_found() {
        let mut w = Warehouse::new("Central").unwrap();
        let err = w.remove_product(ProductId::new()).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}

//! Typed filters and [`Record`] bindings for every stored kind.
//!
//! A filter field left as `None` does not constrain the query. `*_any` lists
//! match records whose value is one of the listed values; an empty list
//! matches nothing.

use chrono::NaiveDate;
use serde_json::{Map, Value, json};

use almoner_beneficiaries::{Family, Patient, normalize_national_id};
use almoner_core::{DeliveryId, Entity, FamilyId, PatientId, ProductId, WarehouseId};
use almoner_deliveries::{Delivery, DeliveryState};
use almoner_inventory::Warehouse;

use super::r#trait::{Record, RecordFilter};

fn any_of<T: PartialEq>(list: &Option<Vec<T>>, value: &T) -> bool {
    list.as_ref().is_none_or(|l| l.contains(value))
}

fn eq<T: PartialEq>(wanted: &Option<T>, value: &T) -> bool {
    wanted.as_ref().is_none_or(|w| w == value)
}

fn containment(entries: Map<String, Value>) -> Option<Value> {
    if entries.is_empty() {
        None
    } else {
        Some(Value::Object(entries))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarehouseFilter {
    pub id: Option<WarehouseId>,
    pub id_any: Option<Vec<WarehouseId>>,
    pub name: Option<String>,
    pub name_any: Option<Vec<String>>,
    /// Warehouses holding this product.
    pub product_id: Option<ProductId>,
}

impl WarehouseFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: WarehouseId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn holding(product_id: ProductId) -> Self {
        Self {
            product_id: Some(product_id),
            ..Self::default()
        }
    }
}

impl RecordFilter<Warehouse> for WarehouseFilter {
    fn matches(&self, w: &Warehouse) -> bool {
        eq(&self.id, &w.id())
            && any_of(&self.id_any, &w.id())
            && self.name.as_deref().is_none_or(|n| n == w.name())
            && self
                .name_any
                .as_ref()
                .is_none_or(|names| names.iter().any(|n| n == w.name()))
            && self
                .product_id
                .is_none_or(|p| w.product(p).is_some())
    }

    fn containment(&self) -> Option<Value> {
        let mut doc = Map::new();
        if let Some(id) = self.id {
            doc.insert("id".into(), json!(id));
        }
        if let Some(name) = &self.name {
            doc.insert("name".into(), json!(name));
        }
        if let Some(product_id) = self.product_id {
            doc.insert("products".into(), json!([{ "id": product_id }]));
        }
        containment(doc)
    }
}

impl Record for Warehouse {
    type Id = WarehouseId;
    type Filter = WarehouseFilter;

    const COLLECTION: &'static str = "warehouses";

    fn record_id(&self) -> WarehouseId {
        self.id()
    }

    fn version(&self) -> u64 {
        Warehouse::version(self)
    }

    fn set_version(&mut self, version: u64) {
        Warehouse::set_version(self, version)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryFilter {
    pub id: Option<DeliveryId>,
    pub family_id: Option<FamilyId>,
    pub family_id_any: Option<Vec<FamilyId>>,
    pub state: Option<DeliveryState>,
    /// Inclusive lower bound on `delivery_date`.
    pub from: Option<NaiveDate>,
    /// Inclusive upper bound on `delivery_date`.
    pub to: Option<NaiveDate>,
}

impl DeliveryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: DeliveryId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn for_family(family_id: FamilyId) -> Self {
        Self {
            family_id: Some(family_id),
            ..Self::default()
        }
    }
}

impl RecordFilter<Delivery> for DeliveryFilter {
    fn matches(&self, d: &Delivery) -> bool {
        eq(&self.id, &d.id())
            && eq(&self.family_id, &d.family_id())
            && any_of(&self.family_id_any, &d.family_id())
            && eq(&self.state, &d.state())
            && self.from.is_none_or(|from| d.delivery_date() >= from)
            && self.to.is_none_or(|to| d.delivery_date() <= to)
    }

    fn containment(&self) -> Option<Value> {
        let mut doc = Map::new();
        if let Some(id) = self.id {
            doc.insert("id".into(), json!(id));
        }
        if let Some(family_id) = self.family_id {
            doc.insert("family_id".into(), json!(family_id));
        }
        if let Some(state) = self.state {
            doc.insert("state".into(), json!(state));
        }
        containment(doc)
    }
}

impl Record for Delivery {
    type Id = DeliveryId;
    type Filter = DeliveryFilter;

    const COLLECTION: &'static str = "deliveries";

    fn record_id(&self) -> DeliveryId {
        self.id()
    }

    fn version(&self) -> u64 {
        Delivery::version(self)
    }

    fn set_version(&mut self, version: u64) {
        Delivery::set_version(self, version)
    }
}

/// National ids in family filters are compared in normalized form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyFilter {
    pub id: Option<FamilyId>,
    pub id_any: Option<Vec<FamilyId>>,
    pub head_national_id: Option<String>,
    pub head_national_id_any: Option<Vec<String>>,
    /// Families with any member holding this national id.
    pub member_national_id: Option<String>,
    pub member_national_id_any: Option<Vec<String>>,
}

impl FamilyFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: FamilyId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_head(national_id: &str) -> Self {
        Self {
            head_national_id: normalize_national_id(Some(national_id)),
            ..Self::default()
        }
    }

    pub fn with_member(national_id: &str) -> Self {
        Self {
            member_national_id: normalize_national_id(Some(national_id)),
            ..Self::default()
        }
    }
}

impl RecordFilter<Family> for FamilyFilter {
    fn matches(&self, f: &Family) -> bool {
        let head_nid = f.head().and_then(|h| h.national_id.clone());
        eq(&self.id, &f.id())
            && any_of(&self.id_any, &f.id())
            && self
                .head_national_id
                .as_ref()
                .is_none_or(|nid| head_nid.as_ref() == Some(nid))
            && self.head_national_id_any.as_ref().is_none_or(|nids| {
                head_nid.as_ref().is_some_and(|h| nids.contains(h))
            })
            && self
                .member_national_id
                .as_deref()
                .is_none_or(|nid| f.national_ids().any(|m| m == nid))
            && self
                .member_national_id_any
                .as_ref()
                .is_none_or(|nids| f.national_ids().any(|m| nids.iter().any(|n| n == m)))
    }

    fn containment(&self) -> Option<Value> {
        let mut doc = Map::new();
        if let Some(id) = self.id {
            doc.insert("id".into(), json!(id));
        }
        let mut members = Vec::new();
        if let Some(nid) = &self.head_national_id {
            members.push(json!({ "national_id": nid, "family_head": true }));
        }
        if let Some(nid) = &self.member_national_id {
            members.push(json!({ "national_id": nid }));
        }
        if !members.is_empty() {
            doc.insert("members".into(), Value::Array(members));
        }
        containment(doc)
    }
}

impl Record for Family {
    type Id = FamilyId;
    type Filter = FamilyFilter;

    const COLLECTION: &'static str = "families";

    fn record_id(&self) -> FamilyId {
        self.id()
    }

    fn version(&self) -> u64 {
        Family::version(self)
    }

    fn set_version(&mut self, version: u64) {
        Family::set_version(self, version)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientFilter {
    pub id: Option<PatientId>,
    pub national_id: Option<String>,
    pub national_id_any: Option<Vec<String>>,
}

impl PatientFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: PatientId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_national_id(national_id: &str) -> Self {
        Self {
            national_id: normalize_national_id(Some(national_id)),
            ..Self::default()
        }
    }
}

impl RecordFilter<Patient> for PatientFilter {
    fn matches(&self, p: &Patient) -> bool {
        eq(&self.id, &p.id())
            && self
                .national_id
                .as_deref()
                .is_none_or(|nid| nid == p.national_id())
            && self
                .national_id_any
                .as_ref()
                .is_none_or(|nids| nids.iter().any(|n| n == p.national_id()))
    }

    fn containment(&self) -> Option<Value> {
        let mut doc = Map::new();
        if let Some(id) = self.id {
            doc.insert("id".into(), json!(id));
        }
        if let Some(nid) = &self.national_id {
            doc.insert("national_id".into(), json!(nid));
        }
        containment(doc)
    }
}

impl Record for Patient {
    type Id = PatientId;
    type Filter = PatientFilter;

    const COLLECTION: &'static str = "patients";

    fn record_id(&self) -> PatientId {
        self.id()
    }

    fn version(&self) -> u64 {
        Patient::version(self)
    }

    fn set_version(&mut self, version: u64) {
        Patient::set_version(self, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almoner_beneficiaries::{Gender, NewFamily, NewPerson};
    use almoner_inventory::NewProduct;

    fn family(head_nid: &str, other_nid: &str) -> Family {
        let person = |name: &str, nid: &str, head: bool| NewPerson {
            name: name.to_string(),
            surname: "Diaz".to_string(),
            national_id: Some(nid.to_string()),
            gender: Gender::Female,
            birth_date: None,
            family_head: head,
        };
        Family::create(NewFamily {
            phone: None,
            address: None,
            observations: None,
            members: vec![person("Ana", head_nid, true), person("Eva", other_nid, false)],
        })
        .unwrap()
    }

    #[test]
    fn family_filter_distinguishes_head_from_member() {
        let f = family("h1", "m1");
        assert!(FamilyFilter::by_head("H1").matches(&f));
        assert!(!FamilyFilter::by_head("m1").matches(&f));
        assert!(FamilyFilter::with_member("m1").matches(&f));

        let any = FamilyFilter {
            member_national_id_any: Some(vec!["X".into(), "M1".into()]),
            ..FamilyFilter::default()
        };
        assert!(any.matches(&f));
    }

    #[test]
    fn empty_any_list_matches_nothing() {
        let f = family("h1", "m1");
        let filter = FamilyFilter {
            id_any: Some(vec![]),
            ..FamilyFilter::default()
        };
        assert!(!filter.matches(&f));
    }

    #[test]
    fn warehouse_containment_targets_product_list() {
        let mut w = Warehouse::new("Central").unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let pid = w
            .add_product(
                NewProduct {
                    name: "Rice".into(),
                    quantity: 3,
                    expiration_date: None,
                },
                today,
            )
            .unwrap();

        let filter = WarehouseFilter::holding(pid);
        assert!(filter.matches(&w));
        assert_eq!(
            filter.containment().unwrap(),
            json!({ "products": [{ "id": pid }] })
        );
        assert!(WarehouseFilter::all().containment().is_none());
    }

    #[test]
    fn delivery_filter_applies_inclusive_date_range() {
        use almoner_beneficiaries::FamilySummary;
        use almoner_deliveries::{DeliveryLine, NewDelivery};

        let date = NaiveDate::from_ymd_opt(2026, 5, 10).unwrap();
        let d = Delivery::import(
            NewDelivery {
                delivery_date: date,
                months: 1,
                lines: vec![DeliveryLine {
                    product_id: ProductId::new(),
                    quantity: 1,
                    status: None,
                }],
                family_id: FamilyId::new(),
                state: None,
            },
            FamilySummary::default(),
        )
        .unwrap();

        let within = DeliveryFilter {
            from: Some(date),
            to: Some(date),
            ..DeliveryFilter::default()
        };
        assert!(within.matches(&d));
        let after = DeliveryFilter {
            from: date.succ_opt(),
            ..DeliveryFilter::default()
        };
        assert!(!after.matches(&d));
        assert_eq!(
            DeliveryFilter {
                state: Some(DeliveryState::Next),
                ..DeliveryFilter::default()
            }
            .containment()
            .unwrap(),
            json!({ "state": "NEXT" })
        );
    }
}

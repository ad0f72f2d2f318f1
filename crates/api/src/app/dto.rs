use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use almoner_core::{DomainResult, FamilyId};
use almoner_deliveries::DeliveryState;
use almoner_infra::store::{DeliveryFilter, Page};

/// `?skip=&limit=` on list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl ListQuery {
    pub fn page(&self) -> Page {
        Page::new(self.skip, self.limit)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeliveryQuery {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub family_id: Option<String>,
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub skip: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl DeliveryQuery {
    pub fn filter(&self) -> DomainResult<DeliveryFilter> {
        let state = self
            .state
            .as_deref()
            .map(str::parse::<DeliveryState>)
            .transpose()?;
        let family_id = self
            .family_id
            .as_deref()
            .map(str::parse::<FamilyId>)
            .transpose()?;
        Ok(DeliveryFilter {
            family_id,
            state,
            from: self.from,
            to: self.to,
            ..DeliveryFilter::default()
        })
    }

    pub fn page(&self) -> Page {
        Page::new(self.skip, self.limit)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateWarehouseRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameWarehouseRequest {
    pub name: String,
}

/// One page of records plus the total matching count.
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> From<(Vec<T>, u64)> for ListResponse<T> {
    fn from((items, total): (Vec<T>, u64)) -> Self {
        Self { items, total }
    }
}

use core::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use almoner_beneficiaries::FamilySummary;
use almoner_core::{DeliveryId, DomainError, DomainResult, Entity, FamilyId, ProductId};
use almoner_inventory::{StockDeltas, StockLine};

/// Delivery lifecycle: `NEXT -> NOTIFIED -> DELIVERED`.
///
/// Transitions are not hard-blocked; a patch may set any state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryState {
    #[default]
    Next,
    Notified,
    Delivered,
}

impl FromStr for DeliveryState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEXT" => Ok(DeliveryState::Next),
            "NOTIFIED" => Ok(DeliveryState::Notified),
            "DELIVERED" => Ok(DeliveryState::Delivered),
            other => Err(DomainError::bad_request(format!(
                "invalid delivery state '{other}' (expected NEXT, NOTIFIED or DELIVERED)"
            ))),
        }
    }
}

/// Line item: a product, a positive quantity and a free-text status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLine {
    pub product_id: ProductId,
    pub quantity: i64,
    #[serde(default)]
    pub status: Option<String>,
}

impl DeliveryLine {
    pub fn stock_line(&self) -> StockLine {
        StockLine::new(self.product_id, self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDelivery {
    pub delivery_date: NaiveDate,
    pub months: u32,
    pub lines: Vec<DeliveryLine>,
    pub family_id: FamilyId,
    #[serde(default)]
    pub state: Option<DeliveryState>,
}

/// Partial delivery update: `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPatch {
    #[serde(default)]
    pub delivery_date: Option<NaiveDate>,
    #[serde(default)]
    pub months: Option<u32>,
    #[serde(default)]
    pub lines: Option<Vec<DeliveryLine>>,
    #[serde(default)]
    pub family_id: Option<FamilyId>,
    #[serde(default)]
    pub state: Option<DeliveryState>,
}

impl DeliveryPatch {
    /// Whether the patch explicitly moves the delivery out of `DELIVERED`.
    pub fn clears_delivered(&self) -> bool {
        matches!(self.state, Some(s) if s != DeliveryState::Delivered)
    }
}

/// Delivery record. Product ids across lines are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    id: DeliveryId,
    delivery_date: NaiveDate,
    months: u32,
    lines: Vec<DeliveryLine>,
    family_id: FamilyId,
    #[serde(default)]
    family: FamilySummary,
    #[serde(default)]
    state: DeliveryState,
    #[serde(default)]
    version: u64,
}

impl Delivery {
    /// Build a delivery scheduled today or later.
    pub fn create(new: NewDelivery, family: FamilySummary, today: NaiveDate) -> DomainResult<Self> {
        ensure_not_past(new.delivery_date, today)?;
        Self::build(new, family)
    }

    /// Build a delivery from imported data; historical dates are accepted.
    pub fn import(new: NewDelivery, family: FamilySummary) -> DomainResult<Self> {
        Self::build(new, family)
    }

    fn build(new: NewDelivery, family: FamilySummary) -> DomainResult<Self> {
        ensure_months(new.months)?;
        validate_lines(&new.lines)?;
        Ok(Self {
            id: DeliveryId::new(),
            delivery_date: new.delivery_date,
            months: new.months,
            lines: normalize_lines(new.lines),
            family_id: new.family_id,
            family,
            state: new.state.unwrap_or_default(),
            version: 0,
        })
    }

    pub fn delivery_date(&self) -> NaiveDate {
        self.delivery_date
    }

    pub fn months(&self) -> u32 {
        self.months
    }

    pub fn lines(&self) -> &[DeliveryLine] {
        &self.lines
    }

    pub fn family_id(&self) -> FamilyId {
        self.family_id
    }

    pub fn family(&self) -> &FamilySummary {
        &self.family
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn is_delivered(&self) -> bool {
        self.state == DeliveryState::Delivered
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn stock_lines(&self) -> Vec<StockLine> {
        self.lines.iter().map(DeliveryLine::stock_line).collect()
    }

    /// Reject updates to a delivered delivery unless the patch moves it out of `DELIVERED`.
    pub fn ensure_patchable(&self, patch: &DeliveryPatch) -> DomainResult<()> {
        if self.is_delivered() && !patch.clears_delivered() {
            return Err(DomainError::conflict("cannot update a delivered delivery"));
        }
        Ok(())
    }

    /// Merge a patch. The family summary must be supplied when the patch
    /// changes `family_id`.
    pub fn apply_patch(
        &mut self,
        patch: DeliveryPatch,
        family: Option<FamilySummary>,
        today: NaiveDate,
    ) -> DomainResult<()> {
        self.ensure_patchable(&patch)?;
        if let Some(date) = patch.delivery_date {
            ensure_not_past(date, today)?;
        }
        if let Some(months) = patch.months {
            ensure_months(months)?;
        }
        if let Some(lines) = &patch.lines {
            validate_lines(lines)?;
        }
        if patch.family_id.is_some() && family.is_none() {
            return Err(DomainError::internal(
                "family summary missing for a family change",
            ));
        }

        if let Some(date) = patch.delivery_date {
            self.delivery_date = date;
        }
        if let Some(months) = patch.months {
            self.months = months;
        }
        if let Some(lines) = patch.lines {
            self.lines = normalize_lines(lines);
        }
        if let (Some(family_id), Some(summary)) = (patch.family_id, family) {
            self.family_id = family_id;
            self.family = summary;
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
        Ok(())
    }

    /// Overwrite fields from an imported row group, keeping id and version.
    pub fn overwrite_from_import(&mut self, new: NewDelivery, family: FamilySummary) -> DomainResult<()> {
        if self.is_delivered() && !matches!(new.state, Some(s) if s != DeliveryState::Delivered) {
            return Err(DomainError::conflict("cannot update a delivered delivery"));
        }
        let rebuilt = Self::build(new, family)?;
        self.delivery_date = rebuilt.delivery_date;
        self.months = rebuilt.months;
        self.lines = rebuilt.lines;
        self.family_id = rebuilt.family_id;
        self.family = rebuilt.family;
        self.state = rebuilt.state;
        Ok(())
    }

    /// Refresh the embedded family copy; returns whether it changed.
    pub fn refresh_family(&mut self, summary: &FamilySummary) -> bool {
        if &self.family == summary {
            return false;
        }
        self.family = summary.clone();
        true
    }
}

impl Entity for Delivery {
    type Id = DeliveryId;

    fn id(&self) -> DeliveryId {
        self.id
    }
}

/// Positive quantities and unique products.
pub fn validate_lines(lines: &[DeliveryLine]) -> DomainResult<()> {
    let stock: Vec<StockLine> = lines.iter().map(DeliveryLine::stock_line).collect();
    StockDeltas::reserve(&stock)?;
    Ok(())
}

fn normalize_lines(lines: Vec<DeliveryLine>) -> Vec<DeliveryLine> {
    lines
        .into_iter()
        .map(|mut l| {
            l.status = l
                .status
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            l
        })
        .collect()
}

fn ensure_not_past(date: NaiveDate, today: NaiveDate) -> DomainResult<()> {
    if date < today {
        return Err(DomainError::bad_request(format!(
            "delivery date {date} is in the past"
        )));
    }
    Ok(())
}

fn ensure_months(months: u32) -> DomainResult<()> {
    if months == 0 {
        return Err(DomainError::bad_request("months must be at least 1"));
    }
    Ok(())
}

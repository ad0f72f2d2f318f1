//! Refresh of the family copies embedded in deliveries.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, instrument, warn};

use almoner_beneficiaries::{Family, FamilySummary};
use almoner_core::{Entity, ExpectedVersion, FamilyId};
use almoner_deliveries::Delivery;

use crate::store::{BulkOp, DeliveryFilter, Page, RecordStore, StoreError};

/// Outcome of one fan-out pass.
///
/// `matched` counts deliveries referencing the families, `modified` those
/// whose embedded copy was rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub matched: u64,
    pub modified: u64,
    pub failed: u64,
}

/// Rewrite the embedded summary of every delivery referencing one of
/// `families` when it differs from the family's current data.
///
/// Uses a single unordered bulk replace; per-delivery failures are logged
/// and counted, not returned.
#[instrument(skip(deliveries, families), fields(families = families.len()), err)]
pub async fn propagate_family_summaries<S>(
    deliveries: &S,
    families: &[Family],
) -> Result<FanOutReport, StoreError>
where
    S: RecordStore<Delivery> + ?Sized,
{
    if families.is_empty() {
        return Ok(FanOutReport::default());
    }
    let summaries: HashMap<FamilyId, FamilySummary> =
        families.iter().map(|f| (f.id(), f.summary())).collect();
    let filter = DeliveryFilter {
        family_id_any: Some(summaries.keys().copied().collect()),
        ..DeliveryFilter::default()
    };
    let referencing = deliveries.get_multi(&filter, Page::all()).await?;
    let matched = referencing.len() as u64;

    let ops: Vec<BulkOp<Delivery>> = referencing
        .into_iter()
        .filter_map(|mut d| {
            let summary = summaries.get(&d.family_id())?;
            let expected = ExpectedVersion::Exact(d.version());
            d.refresh_family(summary)
                .then_some(BulkOp::Replace { record: d, expected })
        })
        .collect();
    if ops.is_empty() {
        return Ok(FanOutReport {
            matched,
            ..FanOutReport::default()
        });
    }

    let outcome = deliveries.bulk(ops, false).await?;
    outcome.ensure_acknowledged()?;
    for failure in &outcome.failures {
        warn!(index = failure.index, error = %failure.error, "family copy refresh failed");
    }
    let report = FanOutReport {
        matched,
        modified: outcome.modified,
        failed: outcome.failed(),
    };
    info!(
        matched = report.matched,
        modified = report.modified,
        failed = report.failed,
        "family copies refreshed"
    );
    Ok(report)
}

pub async fn propagate_family_summary<S>(
    deliveries: &S,
    family: &Family,
) -> Result<FanOutReport, StoreError>
where
    S: RecordStore<Delivery> + ?Sized,
{
    propagate_family_summaries(deliveries, std::slice::from_ref(family)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRecordStore;
    use almoner_beneficiaries::{FamilyPatch, Gender, NewFamily, NewPerson};
    use almoner_core::ProductId;
    use almoner_deliveries::{DeliveryLine, NewDelivery};
    use chrono::NaiveDate;

    fn family() -> Family {
        Family::create(NewFamily {
            phone: Some("600".into()),
            address: None,
            observations: None,
            members: vec![NewPerson {
                name: "Ana".into(),
                surname: "Lopez".into(),
                national_id: None,
                gender: Gender::Female,
                birth_date: None,
                family_head: true,
            }],
        })
        .unwrap()
    }

    fn delivery_for(family: &Family) -> Delivery {
        Delivery::import(
            NewDelivery {
                delivery_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
                months: 1,
                lines: vec![DeliveryLine {
                    product_id: ProductId::new(),
                    quantity: 1,
                    status: None,
                }],
                family_id: family.id(),
                state: None,
            },
            family.summary(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn only_stale_copies_are_rewritten() {
        let store = InMemoryRecordStore::<Delivery>::new();
        let mut f = family();
        let other = family();
        store.create(delivery_for(&f)).await.unwrap();
        store.create(delivery_for(&f)).await.unwrap();
        store.create(delivery_for(&other)).await.unwrap();

        let unchanged = propagate_family_summary(&store, &f).await.unwrap();
        assert_eq!(unchanged, FanOutReport { matched: 2, modified: 0, failed: 0 });

        f.apply_patch(FamilyPatch {
            phone: Some("611".into()),
            ..FamilyPatch::default()
        });
        let report = propagate_family_summary(&store, &f).await.unwrap();
        assert_eq!(report, FanOutReport { matched: 2, modified: 2, failed: 0 });

        let refreshed = store
            .get_multi(&DeliveryFilter::for_family(f.id()), Page::all())
            .await
            .unwrap();
        assert!(refreshed.iter().all(|d| d.family().phone.as_deref() == Some("611")));
        let untouched = store
            .get(&DeliveryFilter::for_family(other.id()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.version(), 0);
    }
}

//! Two-phase import planning: dedup by natural key, partition against
//! existing records, then submit insert and update batches.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::hash::Hash;

use serde::Serialize;
use tracing::{info, warn};

use almoner_core::ExpectedVersion;
use almoner_infra::fanout::FanOutReport;
use almoner_infra::store::{BulkOp, Record, RecordStore};

use crate::error::ImportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    Patients,
    Families,
    Deliveries,
    Products,
}

impl Display for ImportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ImportKind::Patients => "patients",
            ImportKind::Families => "families",
            ImportKind::Deliveries => "deliveries",
            ImportKind::Products => "products",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub kind: ImportKind,
    pub inserted: u64,
    pub updated: u64,
    pub failed: u64,
    /// Delivery copies refreshed after family changes.
    pub propagated: FanOutReport,
}

impl ImportReport {
    pub fn new(kind: ImportKind) -> Self {
        Self {
            kind,
            inserted: 0,
            updated: 0,
            failed: 0,
            propagated: FanOutReport::default(),
        }
    }
}

/// A candidate with its natural key and the first row it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyed<K, C> {
    pub key: K,
    pub row: usize,
    pub candidate: C,
}

/// Reject a sheet listing the same natural key twice.
pub fn ensure_unique<K, C>(items: &[Keyed<K, C>], what: &'static str) -> Result<(), ImportError>
where
    K: Eq + Hash + Display,
{
    let mut seen: HashMap<&K, usize> = HashMap::with_capacity(items.len());
    for item in items {
        if let Some(first) = seen.insert(&item.key, item.row) {
            return Err(ImportError::DuplicateKey {
                what,
                key: item.key.to_string(),
                first,
                second: item.row,
            });
        }
    }
    Ok(())
}

/// Disjoint insert and update batches.
#[derive(Debug)]
pub struct Plan<K, C, R> {
    pub inserts: Vec<Keyed<K, C>>,
    /// Existing record paired with the candidate replacing it.
    pub updates: Vec<(R, Keyed<K, C>)>,
}

/// Candidates whose key is in `existing` become updates, the rest inserts.
pub fn partition<K, C, R>(candidates: Vec<Keyed<K, C>>, mut existing: HashMap<K, R>) -> Plan<K, C, R>
where
    K: Eq + Hash,
{
    let mut plan = Plan {
        inserts: Vec::new(),
        updates: Vec::new(),
    };
    for keyed in candidates {
        match existing.remove(&keyed.key) {
            Some(record) => plan.updates.push((record, keyed)),
            None => plan.inserts.push(keyed),
        }
    }
    plan
}

/// Counts of one submitted plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submitted {
    pub inserted: u64,
    pub updated: u64,
    pub failed: u64,
    /// Positions in the insert batch that did not apply.
    pub rejected_inserts: BTreeSet<usize>,
    /// Positions in the update batch that did not apply.
    pub rejected_updates: BTreeSet<usize>,
}

/// Submit inserts and updates as two unordered bulk writes.
///
/// Updates are guarded by the version each record was loaded at.
/// Per-operation failures are logged and counted.
pub async fn submit<R, S>(store: &S, inserts: Vec<R>, updates: Vec<R>) -> Result<Submitted, ImportError>
where
    R: Record,
    S: RecordStore<R> + ?Sized,
{
    let mut submitted = Submitted::default();

    if !inserts.is_empty() {
        let ops = inserts.into_iter().map(BulkOp::Insert).collect();
        let outcome = store.bulk(ops, false).await?;
        outcome.ensure_acknowledged()?;
        for failure in &outcome.failures {
            warn!(collection = R::COLLECTION, index = failure.index, error = %failure.error, "import insert failed");
            submitted.rejected_inserts.insert(failure.index);
        }
        submitted.inserted = outcome.inserted;
        submitted.failed += outcome.failed();
    }

    if !updates.is_empty() {
        let ops = updates
            .into_iter()
            .map(|record| {
                let expected = ExpectedVersion::Exact(record.version());
                BulkOp::Replace { record, expected }
            })
            .collect();
        let outcome = store.bulk(ops, false).await?;
        outcome.ensure_acknowledged()?;
        for failure in &outcome.failures {
            warn!(collection = R::COLLECTION, index = failure.index, error = %failure.error, "import update failed");
            submitted.rejected_updates.insert(failure.index);
        }
        submitted.updated = outcome.modified;
        submitted.failed += outcome.failed();
    }

    info!(
        collection = R::COLLECTION,
        inserted = submitted.inserted,
        updated = submitted.updated,
        failed = submitted.failed,
        "import batches written"
    );
    Ok(submitted)
}

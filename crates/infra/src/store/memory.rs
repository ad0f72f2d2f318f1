use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use almoner_core::ExpectedVersion;

use super::r#trait::{
    BulkFailure, BulkOp, BulkOutcome, DeleteOutcome, OpEffect, Page, Record, RecordFilter,
    RecordStore, StoreError,
};

/// In-memory record store.
///
/// Intended for tests/dev. Records are kept in id order, which for UUIDv7
/// ids is creation order. No lock is held across an `.await`.
#[derive(Debug)]
pub struct InMemoryRecordStore<R: Record> {
    records: RwLock<BTreeMap<R::Id, R>>,
}

impl<R: Record> InMemoryRecordStore<R> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("lock poisoned".to_string())
    }

    fn matching(&self, filter: &R::Filter) -> Result<Vec<R>, StoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}

impl<R: Record> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

fn insert<R: Record>(records: &mut BTreeMap<R::Id, R>, mut record: R) -> Result<R::Id, StoreError> {
    let id = record.record_id();
    if records.contains_key(&id) {
        return Err(StoreError::Duplicate(format!(
            "{} record {id} already exists",
            R::COLLECTION
        )));
    }
    record.set_version(0);
    records.insert(id, record);
    Ok(id)
}

fn replace<R: Record>(
    records: &mut BTreeMap<R::Id, R>,
    mut record: R,
    expected: ExpectedVersion,
) -> Result<Option<R>, StoreError> {
    let id = record.record_id();
    let Some(current) = records.get(&id) else {
        return Ok(None);
    };
    let current_version = current.version();
    if !expected.matches(current_version) {
        return Err(StoreError::Concurrency(format!(
            "{} record {id}: expected {expected:?}, found {current_version}",
            R::COLLECTION
        )));
    }
    record.set_version(current_version + 1);
    records.insert(id, record.clone());
    Ok(Some(record))
}

fn apply_op<R: Record>(records: &mut BTreeMap<R::Id, R>, op: BulkOp<R>) -> Result<OpEffect, StoreError> {
    match op {
        BulkOp::Insert(record) => insert(records, record).map(|_| OpEffect::Inserted),
        BulkOp::Replace { record, expected } => Ok(match replace(records, record, expected)? {
            Some(_) => OpEffect::Replaced,
            None => OpEffect::Unmatched,
        }),
        BulkOp::Delete(id) => Ok(match records.remove(&id) {
            Some(_) => OpEffect::Deleted,
            None => OpEffect::Unmatched,
        }),
    }
}

#[async_trait]
impl<R: Record> RecordStore<R> for InMemoryRecordStore<R> {
    async fn get(&self, filter: &R::Filter) -> Result<Option<R>, StoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.values().find(|r| filter.matches(r)).cloned())
    }

    async fn get_multi(&self, filter: &R::Filter, page: Page) -> Result<Vec<R>, StoreError> {
        Ok(page.apply(self.matching(filter)?.into_iter()))
    }

    async fn count(&self, filter: &R::Filter) -> Result<u64, StoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.values().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn create(&self, record: R) -> Result<R::Id, StoreError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        insert(&mut records, record)
    }

    async fn replace(&self, record: R, expected: ExpectedVersion) -> Result<Option<R>, StoreError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        replace(&mut records, record, expected)
    }

    async fn delete(&self, filter: &R::Filter) -> Result<DeleteOutcome, StoreError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        let before = records.len();
        records.retain(|_, r| !filter.matches(r));
        Ok(DeleteOutcome {
            deleted_count: (before - records.len()) as u64,
        })
    }

    async fn bulk(&self, ops: Vec<BulkOp<R>>, ordered: bool) -> Result<BulkOutcome, StoreError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        let mut outcome = BulkOutcome::acknowledged();
        for (index, op) in ops.into_iter().enumerate() {
            match apply_op(&mut records, op) {
                Ok(effect) => outcome.record(effect),
                Err(error) => {
                    outcome.failures.push(BulkFailure { index, error });
                    if ordered {
                        break;
                    }
                }
            }
        }
        Ok(outcome)
    }
}

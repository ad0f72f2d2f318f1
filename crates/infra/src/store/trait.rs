use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use almoner_core::{DomainError, ExpectedVersion};

/// A top-level document kept by a [`RecordStore`].
///
/// Every record carries a version. The store sets it to 0 on create and
/// increments it on every successful replace.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Id: Copy + Eq + Ord + Hash + Debug + Display + Into<Uuid> + From<Uuid> + Send + Sync + 'static;
    type Filter: RecordFilter<Self> + Send + Sync;

    /// Collection name, used as the partition key by persistent stores.
    const COLLECTION: &'static str;

    fn record_id(&self) -> Self::Id;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

/// Typed query over one record kind.
pub trait RecordFilter<R>: Debug {
    /// Exact, in-process match.
    fn matches(&self, record: &R) -> bool;

    /// JSON containment document narrowing the candidate set
    /// (`doc @> containment`). `None` means every record is a candidate.
    ///
    /// Must never exclude a record that `matches` accepts.
    fn containment(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Offset pagination for multi-record reads. Records come back in id order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Page {
    pub skip: u64,
    pub limit: Option<u64>,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(skip: Option<u64>, limit: Option<u64>) -> Self {
        Self {
            skip: skip.unwrap_or(0),
            limit,
        }
    }

    pub(crate) fn apply<R>(&self, records: impl Iterator<Item = R>) -> Vec<R> {
        let skipped = records.skip(usize::try_from(self.skip).unwrap_or(usize::MAX));
        match self.limit {
            Some(limit) => skipped
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .collect(),
            None => skipped.collect(),
        }
    }
}

/// One operation of a bulk write.
#[derive(Debug, Clone)]
pub enum BulkOp<R: Record> {
    Insert(R),
    Replace { record: R, expected: ExpectedVersion },
    Delete(R::Id),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct DeleteOutcome {
    pub deleted_count: u64,
}

/// A bulk operation that did not apply, by position in the submitted batch.
#[derive(Debug)]
pub struct BulkFailure {
    pub index: usize,
    pub error: StoreError,
}

/// Result of a bulk write.
///
/// `matched` counts replace operations whose target existed; `modified`
/// counts those actually written.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub acknowledged: bool,
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub deleted: u64,
    pub failures: Vec<BulkFailure>,
}

impl BulkOutcome {
    pub(crate) fn acknowledged() -> Self {
        Self {
            acknowledged: true,
            ..Self::default()
        }
    }

    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }

    /// Fail when the backend stopped processing the batch.
    pub fn ensure_acknowledged(&self) -> Result<(), StoreError> {
        if self.acknowledged {
            Ok(())
        } else {
            Err(StoreError::Unacknowledged(format!(
                "bulk write stopped after {} failures",
                self.failures.len()
            )))
        }
    }
}

/// What a single applied operation did.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum OpEffect {
    Inserted,
    Replaced,
    Unmatched,
    Deleted,
}

impl BulkOutcome {
    pub(crate) fn record(&mut self, effect: OpEffect) {
        match effect {
            OpEffect::Inserted => self.inserted += 1,
            OpEffect::Replaced => {
                self.matched += 1;
                self.modified += 1;
            }
            OpEffect::Unmatched => {}
            OpEffect::Deleted => self.deleted += 1,
        }
    }
}

/// Record store operation error.
///
/// Infrastructure errors only; domain validation happens before any store call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("write not acknowledged: {0}")]
    Unacknowledged(String),

    #[error("record serialization failed: {0}")]
    Serialization(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for DomainError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(_) | StoreError::Duplicate(_) => {
                DomainError::Conflict(value.to_string())
            }
            _ => DomainError::Internal(value.to_string()),
        }
    }
}

/// Async document store for one record kind.
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    /// First record (in id order) matching `filter`.
    async fn get(&self, filter: &R::Filter) -> Result<Option<R>, StoreError>;

    async fn get_multi(&self, filter: &R::Filter, page: Page) -> Result<Vec<R>, StoreError>;

    async fn count(&self, filter: &R::Filter) -> Result<u64, StoreError>;

    /// Insert a new record at version 0. An existing id is `Duplicate`.
    async fn create(&self, record: R) -> Result<R::Id, StoreError>;

    /// Replace the whole stored record.
    ///
    /// Returns `None` when no record has this id, `Concurrency` when the
    /// stored version does not satisfy `expected`, and otherwise the stored
    /// record carrying its new version.
    async fn replace(&self, record: R, expected: ExpectedVersion) -> Result<Option<R>, StoreError>;

    async fn delete(&self, filter: &R::Filter) -> Result<DeleteOutcome, StoreError>;

    /// Apply a batch. With `ordered` the batch stops at the first failure;
    /// otherwise every operation is attempted.
    async fn bulk(&self, ops: Vec<BulkOp<R>>, ordered: bool) -> Result<BulkOutcome, StoreError>;
}

#[async_trait]
impl<R, S> RecordStore<R> for Arc<S>
where
    R: Record,
    S: RecordStore<R> + ?Sized,
{
    async fn get(&self, filter: &R::Filter) -> Result<Option<R>, StoreError> {
        (**self).get(filter).await
    }

    async fn get_multi(&self, filter: &R::Filter, page: Page) -> Result<Vec<R>, StoreError> {
        (**self).get_multi(filter, page).await
    }

    async fn count(&self, filter: &R::Filter) -> Result<u64, StoreError> {
        (**self).count(filter).await
    }

    async fn create(&self, record: R) -> Result<R::Id, StoreError> {
        (**self).create(record).await
    }

    async fn replace(&self, record: R, expected: ExpectedVersion) -> Result<Option<R>, StoreError> {
        (**self).replace(record, expected).await
    }

    async fn delete(&self, filter: &R::Filter) -> Result<DeleteOutcome, StoreError> {
        (**self).delete(filter).await
    }

    async fn bulk(&self, ops: Vec<BulkOp<R>>, ordered: bool) -> Result<BulkOutcome, StoreError> {
        (**self).bulk(ops, ordered).await
    }
}

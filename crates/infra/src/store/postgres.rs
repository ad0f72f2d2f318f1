//! Postgres-backed record store.
//!
//! Every record kind lives in one `documents` table, partitioned by
//! `collection`. The record body is kept as JSONB; the `version` column is
//! authoritative for optimistic concurrency.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (other) | any other | `Backend` |
//! | PoolClosed / other | N/A | `Backend` |
//!
//! Typed filters are pushed down as a JSONB containment prefilter and then
//! matched exactly in process.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use almoner_core::ExpectedVersion;

use super::r#trait::{
    BulkFailure, BulkOp, BulkOutcome, DeleteOutcome, OpEffect, Page, Record, RecordFilter,
    RecordStore, StoreError,
};

/// Schema for the shared documents table.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection  TEXT        NOT NULL,
    id          UUID        NOT NULL,
    doc         JSONB       NOT NULL,
    version     BIGINT      NOT NULL DEFAULT 0 CHECK (version >= 0),
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (collection, id)
);
CREATE INDEX IF NOT EXISTS documents_doc_idx ON documents USING GIN (doc jsonb_path_ops);
"#;

/// Create the documents table if it does not exist.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    Ok(())
}

/// Postgres-backed store for one record kind.
///
/// Cheap to clone; shares the connection pool.
#[derive(Debug)]
pub struct PostgresRecordStore<R> {
    pool: Arc<PgPool>,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for PostgresRecordStore<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> PostgresRecordStore<R> {
    pub fn new(pool: PgPool) -> Self {
        Self::from_shared(Arc::new(pool))
    }

    pub fn from_shared(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            _record: PhantomData,
        }
    }

    /// Candidate rows for `filter`, decoded and matched exactly, in id order.
    async fn load_matching(&self, filter: &R::Filter) -> Result<Vec<R>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT doc, version
            FROM documents
            WHERE collection = $1 AND ($2::jsonb IS NULL OR doc @> $2::jsonb)
            ORDER BY id ASC
            "#,
        )
        .bind(R::COLLECTION)
        .bind(filter.containment())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_matching", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = decode::<R>(&row)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn insert_in(
        tx: &mut Transaction<'_, Postgres>,
        mut record: R,
    ) -> Result<R::Id, StoreError> {
        let id = record.record_id();
        record.set_version(0);
        let doc = encode(&record)?;
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, doc, version)
            VALUES ($1, $2, $3, 0)
            "#,
        )
        .bind(R::COLLECTION)
        .bind(row_key::<R>(id))
        .bind(doc)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(format!("{} record {id} already exists", R::COLLECTION))
            } else {
                map_sqlx_error("insert", e)
            }
        })?;
        Ok(id)
    }

    async fn replace_in(
        tx: &mut Transaction<'_, Postgres>,
        mut record: R,
        expected: ExpectedVersion,
    ) -> Result<Option<R>, StoreError> {
        let id = record.record_id();
        let row = sqlx::query(
            r#"
            SELECT version
            FROM documents
            WHERE collection = $1 AND id = $2
            FOR UPDATE
            "#,
        )
        .bind(R::COLLECTION)
        .bind(row_key::<R>(id))
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_for_replace", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let current: i64 = row
            .try_get("version")
            .map_err(|e| StoreError::Backend(format!("failed to read version: {e}")))?;
        let current = current as u64;
        if !expected.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "{} record {id}: expected {expected:?}, found {current}",
                R::COLLECTION
            )));
        }

        record.set_version(current + 1);
        let doc = encode(&record)?;
        sqlx::query(
            r#"
            UPDATE documents
            SET doc = $3, version = $4, updated_at = NOW()
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(R::COLLECTION)
        .bind(row_key::<R>(id))
        .bind(doc)
        .bind((current + 1) as i64)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("replace", e))?;
        Ok(Some(record))
    }

    async fn delete_ids_in(
        tx: &mut Transaction<'_, Postgres>,
        ids: Vec<Uuid>,
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            DELETE FROM documents
            WHERE collection = $1 AND id = ANY($2)
            "#,
        )
        .bind(R::COLLECTION)
        .bind(ids)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("delete", e))?;
        Ok(result.rows_affected())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    /// Run one bulk operation in its own transaction.
    async fn apply_op(&self, op: BulkOp<R>) -> Result<OpEffect, StoreError> {
        let mut tx = self.begin().await?;
        let effect = match op {
            BulkOp::Insert(record) => Self::insert_in(&mut tx, record)
                .await
                .map(|_| OpEffect::Inserted),
            BulkOp::Replace { record, expected } => Self::replace_in(&mut tx, record, expected)
                .await
                .map(|r| match r {
                    Some(_) => OpEffect::Replaced,
                    None => OpEffect::Unmatched,
                }),
            BulkOp::Delete(id) => Self::delete_ids_in(&mut tx, vec![id.into()])
                .await
                .map(|n| {
                    if n > 0 {
                        OpEffect::Deleted
                    } else {
                        OpEffect::Unmatched
                    }
                }),
        };
        match effect {
            Ok(effect) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Ok(effect)
            }
            Err(err) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                Err(err)
            }
        }
    }
}

#[async_trait]
impl<R: Record> RecordStore<R> for PostgresRecordStore<R> {
    #[instrument(skip(self), fields(collection = R::COLLECTION), err)]
    async fn get(&self, filter: &R::Filter) -> Result<Option<R>, StoreError> {
        Ok(self.load_matching(filter).await?.into_iter().next())
    }

    #[instrument(skip(self), fields(collection = R::COLLECTION, returned), err)]
    async fn get_multi(&self, filter: &R::Filter, page: Page) -> Result<Vec<R>, StoreError> {
        let records = page.apply(self.load_matching(filter).await?.into_iter());
        Span::current().record("returned", records.len());
        Ok(records)
    }

    #[instrument(skip(self), fields(collection = R::COLLECTION), err)]
    async fn count(&self, filter: &R::Filter) -> Result<u64, StoreError> {
        Ok(self.load_matching(filter).await?.len() as u64)
    }

    #[instrument(skip(self, record), fields(collection = R::COLLECTION, id = %record.record_id()), err)]
    async fn create(&self, record: R) -> Result<R::Id, StoreError> {
        let mut tx = self.begin().await?;
        let id = Self::insert_in(&mut tx, record).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(id)
    }

    #[instrument(
        skip(self, record),
        fields(collection = R::COLLECTION, id = %record.record_id(), expected = ?expected),
        err
    )]
    async fn replace(&self, record: R, expected: ExpectedVersion) -> Result<Option<R>, StoreError> {
        let mut tx = self.begin().await?;
        match Self::replace_in(&mut tx, record, expected).await {
            Ok(stored) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Ok(stored)
            }
            Err(err) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                Err(err)
            }
        }
    }

    #[instrument(skip(self), fields(collection = R::COLLECTION), err)]
    async fn delete(&self, filter: &R::Filter) -> Result<DeleteOutcome, StoreError> {
        let ids: Vec<Uuid> = self
            .load_matching(filter)
            .await?
            .iter()
            .map(|r| r.record_id().into())
            .collect();
        let mut tx = self.begin().await?;
        let deleted_count = Self::delete_ids_in(&mut tx, ids).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(DeleteOutcome { deleted_count })
    }

    #[instrument(skip(self, ops), fields(collection = R::COLLECTION, ops = ops.len()), err)]
    async fn bulk(&self, ops: Vec<BulkOp<R>>, ordered: bool) -> Result<BulkOutcome, StoreError> {
        let mut outcome = BulkOutcome::acknowledged();
        for (index, op) in ops.into_iter().enumerate() {
            match self.apply_op(op).await {
                Ok(effect) => outcome.record(effect),
                Err(error) => {
                    // A backend failure means later operations would fail too.
                    let fatal = matches!(error, StoreError::Backend(_));
                    outcome.failures.push(BulkFailure { index, error });
                    if fatal {
                        outcome.acknowledged = false;
                        break;
                    }
                    if ordered {
                        break;
                    }
                }
            }
        }
        Ok(outcome)
    }
}

/// Primary-key value of a record id in the `documents` table.
fn row_key<R: Record>(id: R::Id) -> Uuid {
    id.into()
}

fn encode<R: Record>(record: &R) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(record).map_err(|e| {
        StoreError::Serialization(format!("failed to encode {} record: {e}", R::COLLECTION))
    })
}

fn decode<R: Record>(row: &sqlx::postgres::PgRow) -> Result<R, StoreError> {
    let doc: serde_json::Value = row
        .try_get("doc")
        .map_err(|e| StoreError::Backend(format!("failed to read doc: {e}")))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|e| StoreError::Backend(format!("failed to read version: {e}")))?;
    let mut record: R = serde_json::from_value(doc).map_err(|e| {
        StoreError::Serialization(format!("failed to decode {} record: {e}", R::COLLECTION))
    })?;
    record.set_version(version as u64);
    Ok(record)
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

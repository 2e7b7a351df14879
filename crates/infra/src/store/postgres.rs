//! Postgres-backed refund store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any | `Database` |
//! | RowNotFound | N/A | `NotFound` |
//! | ColumnDecode / Decode | N/A | `Serialization` |
//! | Other (pool closed, network, ...) | N/A | `Database` |
//!
//! ## Locking
//!
//! - Records are read with `SELECT ... FOR UPDATE` inside the sync unit of work and
//!   written with `ON CONFLICT (user_id, tax_year) DO UPDATE`, so concurrent
//!   first-time creations collapse into one row.
//! - Outbox entries are locked with `FOR UPDATE SKIP LOCKED`: a second worker
//!   skips an entry instead of waiting on it.
//! - Predictions are inserted with `ON CONFLICT DO NOTHING` so a duplicate never
//!   aborts the surrounding transaction.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use refundsync_core::{
    NewOutboxEntry, NewPrediction, OutboxEntry, OutboxEntryId, Prediction, PredictionKey, RecordKey,
    RefundRecord, RefundStatus, StatusTransition, TaxYear, TransitionSource, UserId,
};

use super::{InsertOutcome, RefundStore, StoreError, StoreTx};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const RECORD_COLUMNS: &str = "user_id, tax_year, status, expected_amount, tracking_id, filing_state, \
     last_updated_at, estimated_available_at";

const OUTBOX_COLUMNS: &str =
    "id, event_type, aggregate_key, payload, created_at, processed_at, attempts, last_error, failed_at";

const PREDICTION_COLUMNS: &str = "id, user_id, tax_year, status, eta_days, estimated_available_at, \
     model_name, model_version, features, created_at";

#[derive(Debug, Clone)]
pub struct PostgresRefundStore {
    pool: Arc<PgPool>,
}

impl PostgresRefundStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Connect and apply embedded migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
    }
}

#[async_trait]
impl RefundStore for PostgresRefundStore {
    type Tx = PostgresTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(PostgresTx { tx })
    }

    #[instrument(skip(self), fields(user_id = %key.user_id, tax_year = %key.tax_year), err)]
    async fn find_record(&self, key: RecordKey) -> Result<Option<RefundRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM refund_record WHERE user_id = $1 AND tax_year = $2"
        ))
        .bind(key.user_id.as_uuid())
        .bind(key.tax_year.value())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_record", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn latest_record_for_user(&self, user_id: UserId) -> Result<Option<RefundRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM refund_record WHERE user_id = $1 ORDER BY tax_year DESC LIMIT 1"
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_record_for_user", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self), fields(user_id = %key.user_id, tax_year = %key.tax_year), err)]
    async fn transitions_for(&self, key: RecordKey) -> Result<Vec<StatusTransition>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                user_id,
                tax_year,
                filing_state,
                from_status,
                to_status,
                expected_amount,
                tracking_id,
                source,
                occurred_at
            FROM refund_status_event
            WHERE user_id = $1 AND tax_year = $2
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(key.user_id.as_uuid())
        .bind(key.tax_year.value())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transitions_for", e))?;

        rows.iter().map(transition_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn pending_outbox(&self, max_attempts: u32, limit: usize) -> Result<Vec<OutboxEntryId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM outbox_event
            WHERE processed_at IS NULL
              AND failed_at IS NULL
              AND attempts < $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pending_outbox", e))?;

        rows.iter()
            .map(|r| {
                r.try_get::<i64, _>("id")
                    .map(OutboxEntryId)
                    .map_err(|e| map_sqlx_error("pending_outbox", e))
            })
            .collect()
    }

    #[instrument(skip(self), fields(outbox_id = id.0), err)]
    async fn find_outbox_entry(&self, id: OutboxEntryId) -> Result<Option<OutboxEntry>, StoreError> {
        let row = sqlx::query(&format!("SELECT {OUTBOX_COLUMNS} FROM outbox_event WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_outbox_entry", e))?;

        row.as_ref().map(outbox_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_event WHERE failed_at IS NOT NULL ORDER BY failed_at ASC, id ASC LIMIT $1"
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("dead_letters", e))?;

        rows.iter().map(outbox_from_row).collect()
    }

    #[instrument(skip(self), fields(outbox_id = id.0), err)]
    async fn requeue_outbox_entry(&self, id: OutboxEntryId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_event
            SET failed_at = NULL, attempts = 0
            WHERE id = $1 AND failed_at IS NOT NULL AND processed_at IS NULL
            "#,
        )
        .bind(id.0)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("requeue_outbox_entry", e))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        match self.find_outbox_entry(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("outbox entry {}", id.0))),
        }
    }

    #[instrument(skip(self), fields(user_id = %key.user_id, status = %key.status), err)]
    async fn prediction_exists(&self, key: &PredictionKey) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM refund_eta_prediction
                WHERE user_id = $1 AND tax_year = $2 AND status = $3 AND model_version = $4
            ) AS present
            "#,
        )
        .bind(key.user_id.as_uuid())
        .bind(key.tax_year.value())
        .bind(key.status.as_str())
        .bind(&key.model_version)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("prediction_exists", e))?;

        row.try_get::<bool, _>("present")
            .map_err(|e| map_sqlx_error("prediction_exists", e))
    }

    #[instrument(
        skip(self, prediction),
        fields(
            user_id = %prediction.user_id,
            status = %prediction.status,
            model_version = %prediction.model_version
        ),
        err
    )]
    async fn insert_prediction(&self, prediction: NewPrediction) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO refund_eta_prediction (
                user_id,
                tax_year,
                status,
                eta_days,
                estimated_available_at,
                model_name,
                model_version,
                features,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id, tax_year, status, model_version) DO NOTHING
            "#,
        )
        .bind(prediction.user_id.as_uuid())
        .bind(prediction.tax_year.value())
        .bind(prediction.status.as_str())
        .bind(i32::try_from(prediction.eta_days).unwrap_or(i32::MAX))
        .bind(prediction.estimated_available_at)
        .bind(&prediction.model_name)
        .bind(&prediction.model_version)
        .bind(&prediction.features)
        .bind(prediction.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_prediction", e))?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    #[instrument(skip(self), fields(user_id = %key.user_id, tax_year = %key.tax_year), err)]
    async fn predictions_for(&self, key: RecordKey) -> Result<Vec<Prediction>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM refund_eta_prediction \
             WHERE user_id = $1 AND tax_year = $2 ORDER BY created_at ASC, id ASC"
        ))
        .bind(key.user_id.as_uuid())
        .bind(key.tax_year.value())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("predictions_for", e))?;

        rows.iter().map(prediction_from_row).collect()
    }
}

/// A Postgres transaction used as a unit of work.
///
/// Dropping it without `commit` rolls back.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PostgresTx {
    async fn find_record_for_update(&mut self, key: RecordKey) -> Result<Option<RefundRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM refund_record WHERE user_id = $1 AND tax_year = $2 FOR UPDATE"
        ))
        .bind(key.user_id.as_uuid())
        .bind(key.tax_year.value())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_record_for_update", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn save_record(&mut self, record: &RefundRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refund_record (
                user_id,
                tax_year,
                status,
                expected_amount,
                tracking_id,
                filing_state,
                last_updated_at,
                estimated_available_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, tax_year)
            DO UPDATE SET
                status = EXCLUDED.status,
                expected_amount = EXCLUDED.expected_amount,
                tracking_id = EXCLUDED.tracking_id,
                filing_state = EXCLUDED.filing_state,
                last_updated_at = EXCLUDED.last_updated_at,
                estimated_available_at = EXCLUDED.estimated_available_at
            "#,
        )
        .bind(record.user_id.as_uuid())
        .bind(record.tax_year.value())
        .bind(record.status.as_str())
        .bind(record.expected_amount)
        .bind(&record.tracking_id)
        .bind(&record.filing_state)
        .bind(record.last_updated_at)
        .bind(record.estimated_available_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_record", e))?;
        Ok(())
    }

    async fn append_transition(&mut self, t: &StatusTransition) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refund_status_event (
                user_id,
                tax_year,
                filing_state,
                from_status,
                to_status,
                expected_amount,
                tracking_id,
                source,
                occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(t.user_id.as_uuid())
        .bind(t.tax_year.value())
        .bind(&t.filing_state)
        .bind(t.from_status.map(|s| s.as_str()))
        .bind(t.to_status.as_str())
        .bind(t.expected_amount)
        .bind(&t.tracking_id)
        .bind(t.source.as_str())
        .bind(t.occurred_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_transition", e))?;
        Ok(())
    }

    async fn enqueue_outbox(&mut self, entry: NewOutboxEntry) -> Result<OutboxEntryId, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO outbox_event (event_type, aggregate_key, payload, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&entry.event_type)
        .bind(&entry.aggregate_key)
        .bind(&entry.payload)
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("enqueue_outbox", e))?;

        row.try_get::<i64, _>("id")
            .map(OutboxEntryId)
            .map_err(|e| map_sqlx_error("enqueue_outbox", e))
    }

    async fn latest_prediction(
        &mut self,
        key: RecordKey,
        status: RefundStatus,
    ) -> Result<Option<Prediction>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM refund_eta_prediction \
             WHERE user_id = $1 AND tax_year = $2 AND status = $3 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(key.user_id.as_uuid())
        .bind(key.tax_year.value())
        .bind(status.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("latest_prediction", e))?;

        row.as_ref().map(prediction_from_row).transpose()
    }

    async fn lock_outbox_entry(&mut self, id: OutboxEntryId) -> Result<Option<OutboxEntry>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_event WHERE id = $1 FOR UPDATE SKIP LOCKED"
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_outbox_entry", e))?;

        row.as_ref().map(outbox_from_row).transpose()
    }

    async fn save_outbox_entry(&mut self, entry: &OutboxEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE outbox_event
            SET processed_at = COALESCE(processed_at, $2),
                attempts = $3,
                last_error = $4,
                failed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(entry.id.0)
        .bind(entry.processed_at)
        .bind(i32::try_from(entry.attempts).unwrap_or(i32::MAX))
        .bind(&entry.last_error)
        .bind(entry.failed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_outbox_entry", e))?;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

fn parse_status(raw: &str) -> Result<RefundStatus, StoreError> {
    RefundStatus::from_str(raw).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn record_from_row(row: &PgRow) -> Result<RefundRecord, StoreError> {
    let map = |e| map_sqlx_error("decode refund_record", e);
    Ok(RefundRecord {
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(map)?),
        tax_year: TaxYear::from_stored(row.try_get("tax_year").map_err(map)?),
        status: parse_status(row.try_get::<&str, _>("status").map_err(map)?)?,
        expected_amount: row.try_get::<Option<Decimal>, _>("expected_amount").map_err(map)?,
        tracking_id: row.try_get("tracking_id").map_err(map)?,
        filing_state: row.try_get("filing_state").map_err(map)?,
        last_updated_at: row.try_get("last_updated_at").map_err(map)?,
        estimated_available_at: row.try_get("estimated_available_at").map_err(map)?,
    })
}

fn transition_from_row(row: &PgRow) -> Result<StatusTransition, StoreError> {
    let map = |e| map_sqlx_error("decode refund_status_event", e);
    let source_raw: String = row.try_get("source").map_err(map)?;
    let source = TransitionSource::parse(&source_raw)
        .ok_or_else(|| StoreError::Serialization(format!("unknown transition source: {source_raw}")))?;
    let from_status = row
        .try_get::<Option<&str>, _>("from_status")
        .map_err(map)?
        .map(parse_status)
        .transpose()?;

    Ok(StatusTransition {
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(map)?),
        tax_year: TaxYear::from_stored(row.try_get("tax_year").map_err(map)?),
        filing_state: row.try_get("filing_state").map_err(map)?,
        from_status,
        to_status: parse_status(row.try_get::<&str, _>("to_status").map_err(map)?)?,
        expected_amount: row.try_get("expected_amount").map_err(map)?,
        tracking_id: row.try_get("tracking_id").map_err(map)?,
        source,
        occurred_at: row.try_get("occurred_at").map_err(map)?,
    })
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxEntry, StoreError> {
    let map = |e| map_sqlx_error("decode outbox_event", e);
    let attempts: i32 = row.try_get("attempts").map_err(map)?;
    Ok(OutboxEntry {
        id: OutboxEntryId(row.try_get("id").map_err(map)?),
        event_type: row.try_get("event_type").map_err(map)?,
        aggregate_key: row.try_get("aggregate_key").map_err(map)?,
        payload: row.try_get("payload").map_err(map)?,
        created_at: row.try_get("created_at").map_err(map)?,
        processed_at: row.try_get::<Option<DateTime<Utc>>, _>("processed_at").map_err(map)?,
        attempts: u32::try_from(attempts).unwrap_or(0),
        last_error: row.try_get("last_error").map_err(map)?,
        failed_at: row.try_get("failed_at").map_err(map)?,
    })
}

fn prediction_from_row(row: &PgRow) -> Result<Prediction, StoreError> {
    let map = |e| map_sqlx_error("decode refund_eta_prediction", e);
    let eta_days: i32 = row.try_get("eta_days").map_err(map)?;
    Ok(Prediction {
        id: row.try_get("id").map_err(map)?,
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(map)?),
        tax_year: TaxYear::from_stored(row.try_get("tax_year").map_err(map)?),
        status: parse_status(row.try_get::<&str, _>("status").map_err(map)?)?,
        eta_days: u32::try_from(eta_days).unwrap_or(0),
        estimated_available_at: row.try_get("estimated_available_at").map_err(map)?,
        model_name: row.try_get("model_name").map_err(map)?,
        model_version: row.try_get("model_version").map_err(map)?,
        features: row.try_get("features").map_err(map)?,
        created_at: row.try_get("created_at").map_err(map)?,
    })
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row not found in {operation}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Serialization(format!("decode error in {operation}: {err}"))
        }
        sqlx::Error::PoolClosed => StoreError::Database(format!("connection pool closed in {operation}")),
        _ => StoreError::Database(format!("sqlx error in {operation}: {err}")),
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        map_sqlx_error("query", err)
    }
}

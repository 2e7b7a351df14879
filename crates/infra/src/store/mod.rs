//! Durable state: refund records, transition log, outbox and predictions.
//!
//! Writes that must land together (record + transition + outbox entry, or an
//! outbox entry's bookkeeping) go through a [`StoreTx`] unit of work. Nothing
//! staged in a unit of work is visible to other readers until `commit`, and
//! dropping a unit of work without committing discards it.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use refundsync_core::{
    NewOutboxEntry, NewPrediction, OutboxEntry, OutboxEntryId, Prediction, PredictionKey, RecordKey,
    RefundRecord, RefundStatus, StatusTransition, UserId,
};

pub use memory::InMemoryRefundStore;
pub use postgres::PostgresRefundStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be mapped back into a domain type.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result of an idempotent insert.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same uniqueness key already existed; nothing was written.
    Duplicate,
}

/// One unit of work against the store.
#[async_trait]
pub trait StoreTx: Send {
    /// Load a record and hold its row lock until commit/rollback.
    async fn find_record_for_update(&mut self, key: RecordKey) -> Result<Option<RefundRecord>, StoreError>;

    /// Insert or overwrite the record for `record.key()`.
    async fn save_record(&mut self, record: &RefundRecord) -> Result<(), StoreError>;

    async fn append_transition(&mut self, transition: &StatusTransition) -> Result<(), StoreError>;

    async fn enqueue_outbox(&mut self, entry: NewOutboxEntry) -> Result<OutboxEntryId, StoreError>;

    /// Most recent prediction for `(user, year, status)`, newest `created_at` first.
    async fn latest_prediction(
        &mut self,
        key: RecordKey,
        status: RefundStatus,
    ) -> Result<Option<Prediction>, StoreError>;

    /// Claim an outbox entry for this unit of work.
    ///
    /// Returns `None` if the entry does not exist or another unit of work holds it.
    async fn lock_outbox_entry(&mut self, id: OutboxEntryId) -> Result<Option<OutboxEntry>, StoreError>;

    /// Persist attempts/last_error/processed_at/failed_at of a locked entry.
    async fn save_outbox_entry(&mut self, entry: &OutboxEntry) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RefundStore: Send + Sync + 'static {
    type Tx: StoreTx + 'static;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn find_record(&self, key: RecordKey) -> Result<Option<RefundRecord>, StoreError>;

    /// The user's record with the highest tax year.
    async fn latest_record_for_user(&self, user_id: UserId) -> Result<Option<RefundRecord>, StoreError>;

    /// Transition log for one record, oldest first.
    async fn transitions_for(&self, key: RecordKey) -> Result<Vec<StatusTransition>, StoreError>;

    /// Ids of pending entries below the attempt ceiling, oldest first.
    async fn pending_outbox(&self, max_attempts: u32, limit: usize) -> Result<Vec<OutboxEntryId>, StoreError>;

    async fn find_outbox_entry(&self, id: OutboxEntryId) -> Result<Option<OutboxEntry>, StoreError>;

    async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Clear the dead-letter marker and attempts of an entry.
    ///
    /// Returns `Ok(false)` if the entry exists but is not dead-lettered.
    async fn requeue_outbox_entry(&self, id: OutboxEntryId) -> Result<bool, StoreError>;

    async fn prediction_exists(&self, key: &PredictionKey) -> Result<bool, StoreError>;

    /// Insert unless a prediction with the same key exists.
    async fn insert_prediction(&self, prediction: NewPrediction) -> Result<InsertOutcome, StoreError>;

    async fn predictions_for(&self, key: RecordKey) -> Result<Vec<Prediction>, StoreError>;
}

//! Status read path: cache-aside read, transition detection and outbox enqueue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use refundsync_core::{Observed, RecordKey, RefundRecord, RefundStatus, StatusTransition, TaxYear, UserId};
use refundsync_events::OutboxEvent;

use crate::cache::{status_cache_key, StatusCache};
use crate::config::SyncConfig;
use crate::store::{RefundStore, StoreError, StoreTx};
use crate::upstream::{UpstreamError, UpstreamSource};

/// What clients see for their latest refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub tax_year: TaxYear,
    pub status: RefundStatus,
    pub last_updated_at: DateTime<Utc>,
    pub expected_amount: Option<Decimal>,
    pub tracking_id: Option<String>,
    pub estimated_available_at: Option<DateTime<Utc>>,
}

impl StatusResponse {
    pub fn from_record(record: &RefundRecord) -> Self {
        Self {
            tax_year: record.tax_year,
            status: record.status,
            last_updated_at: record.last_updated_at,
            expected_amount: record.expected_amount,
            tracking_id: record.tracking_id.clone(),
            estimated_available_at: record.estimated_available_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Whether the caller may simply try again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Upstream(UpstreamError::NotFound(_)) => false,
            SyncError::Upstream(_) => true,
            SyncError::Store(StoreError::Conflict(_) | StoreError::Database(_)) => true,
            SyncError::Store(_) | SyncError::Serialization(_) => false,
        }
    }
}

/// Synchronizes a user's refund record with the upstream source on read.
pub struct StatusSyncService<S: RefundStore> {
    store: Arc<S>,
    cache: Arc<dyn StatusCache>,
    upstream: Arc<dyn UpstreamSource>,
    config: SyncConfig,
}

impl<S: RefundStore> Clone for StatusSyncService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cache: self.cache.clone(),
            upstream: self.upstream.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: RefundStore> StatusSyncService<S> {
    pub fn new(
        store: Arc<S>,
        cache: Arc<dyn StatusCache>,
        upstream: Arc<dyn UpstreamSource>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            cache,
            upstream,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Latest refund status for a user.
    ///
    /// Served from cache when possible. Otherwise the upstream is consulted and,
    /// in one unit of work, the record is updated and any status change is
    /// logged and enqueued for the outbox worker.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn get_latest_status(&self, user_id: UserId) -> Result<StatusResponse, SyncError> {
        let cache_key = status_cache_key(user_id);
        if let Some(cached) = self.cached(&cache_key).await {
            debug!("status served from cache");
            return Ok(cached);
        }

        let upstream = tokio::time::timeout(self.config.upstream_timeout, self.upstream.fetch_latest(user_id))
            .await
            .map_err(|_| UpstreamError::Timeout)??;

        let now = Utc::now();
        let key = RecordKey::new(user_id, upstream.observation.tax_year);

        let mut tx = self.store.begin().await?;
        let existing = tx.find_record_for_update(key).await?;
        let Observed { mut record, transition } =
            RefundRecord::observe(existing, user_id, &upstream.observation, upstream.source, now);

        if let Some(t) = &transition {
            self.record_transition(&mut tx, t, now).await?;
        }

        if let Some(prediction) = tx.latest_prediction(key, record.status).await? {
            record.carry_estimate(prediction.estimated_available_at);
        }

        tx.save_record(&record).await?;
        tx.commit().await?;

        if transition.is_some() {
            if let Err(e) = self.cache.delete(&cache_key).await {
                warn!(error = %e, "failed to invalidate status cache");
            }
        }

        let response = StatusResponse::from_record(&record);
        self.store_in_cache(&cache_key, &response).await;
        Ok(response)
    }

    /// Transition log of the user's most recent tax year, oldest first.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn history(&self, user_id: UserId) -> Result<Vec<StatusTransition>, SyncError> {
        let Some(record) = self.store.latest_record_for_user(user_id).await? else {
            return Ok(Vec::new());
        };
        Ok(self.store.transitions_for(record.key()).await?)
    }

    async fn record_transition(
        &self,
        tx: &mut S::Tx,
        transition: &StatusTransition,
        now: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        tx.append_transition(transition).await?;
        let entry = OutboxEvent::status_updated(transition)
            .to_outbox_entry(now)
            .map_err(|e| SyncError::Serialization(e.to_string()))?;
        let outbox_id = tx.enqueue_outbox(entry).await?;

        info!(
            from = ?transition.from_status,
            to = %transition.to_status,
            source = transition.source.as_str(),
            outbox_id = outbox_id.0,
            "refund status transition recorded"
        );
        Ok(())
    }

    async fn cached(&self, key: &str) -> Option<StatusResponse> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(response) => Some(response),
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable cached status");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "status cache read failed");
                None
            }
        }
    }

    async fn store_in_cache(&self, key: &str, response: &StatusResponse) {
        let raw = match serde_json::to_string(response) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to serialize status for cache");
                return;
            }
        };
        if let Err(e) = self.cache.set(key, &raw, self.config.cache_ttl).await {
            warn!(error = %e, "status cache write failed");
        }
    }
}

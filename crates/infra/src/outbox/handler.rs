//! Idempotent consumer for `REFUND_STATUS_UPDATED`: fetch and persist an ETA prediction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use refundsync_ai::{EtaDays, EtaEstimator, EtaRequest};
use refundsync_core::{NewPrediction, OutboxEntry};
use refundsync_events::{HandleOutcome, OutboxEvent, OutboxEventHandler, StatusUpdated};

use crate::store::{InsertOutcome, RefundStore};

pub struct EtaPredictionHandler<S: RefundStore> {
    store: Arc<S>,
    estimator: Arc<dyn EtaEstimator>,
    timeout: Duration,
}

impl<S: RefundStore> EtaPredictionHandler<S> {
    pub fn new(store: Arc<S>, estimator: Arc<dyn EtaEstimator>, timeout: Duration) -> Self {
        Self {
            store,
            estimator,
            timeout,
        }
    }

    async fn predict(&self, update: StatusUpdated) -> HandleOutcome {
        if !update.status.wants_eta() {
            debug!(status = %update.status, "no ETA for status; nothing to do");
            return HandleOutcome::Applied;
        }

        let request = EtaRequest {
            user_id: update.user_id,
            tax_year: update.tax_year,
            status: update.status,
            filing_state: update.filing_state.clone(),
            expected_amount: update.expected_amount,
        };

        let estimate = match tokio::time::timeout(self.timeout, self.estimator.predict(&request)).await {
            Err(_) => return HandleOutcome::transient("estimator timed out"),
            Ok(Err(e)) if e.is_transient() => return HandleOutcome::transient(e.to_string()),
            Ok(Err(e)) => return HandleOutcome::permanent(e.to_string()),
            Ok(Ok(estimate)) => estimate,
        };

        let eta_days = match estimate.eta {
            EtaDays::Days(d) => d,
            EtaDays::Unavailable => {
                return HandleOutcome::permanent(format!(
                    "model not trained ({} {})",
                    estimate.model_name, estimate.model_version
                ));
            }
        };

        let now = Utc::now();
        let prediction = NewPrediction {
            user_id: update.user_id,
            tax_year: update.tax_year,
            status: update.status,
            eta_days,
            estimated_available_at: now + chrono::Duration::days(i64::from(eta_days)),
            model_name: estimate.model_name,
            model_version: estimate.model_version,
            features: estimate.features,
            created_at: now,
        };

        match self.store.prediction_exists(&prediction.key()).await {
            Ok(true) => {
                return HandleOutcome::already_applied(format!(
                    "prediction exists for model version {}",
                    prediction.model_version
                ));
            }
            Ok(false) => {}
            Err(e) => return HandleOutcome::transient(e.to_string()),
        }

        let model_version = prediction.model_version.clone();
        match self.store.insert_prediction(prediction).await {
            Ok(InsertOutcome::Inserted) => {
                info!(
                    user_id = %update.user_id,
                    status = %update.status,
                    eta_days,
                    model_version = %model_version,
                    "eta prediction stored"
                );
                HandleOutcome::Applied
            }
            Ok(InsertOutcome::Duplicate) => HandleOutcome::already_applied(format!(
                "prediction inserted concurrently for model version {model_version}"
            )),
            Err(e) => HandleOutcome::transient(e.to_string()),
        }
    }
}

#[async_trait]
impl<S: RefundStore> OutboxEventHandler for EtaPredictionHandler<S> {
    async fn handle(&self, entry: &OutboxEntry) -> HandleOutcome {
        match OutboxEvent::decode_entry(entry) {
            Ok(Some(OutboxEvent::RefundStatusUpdated(update))) => self.predict(update).await,
            Ok(None) => {
                debug!(event_type = %entry.event_type, "ignoring unknown outbox event type");
                HandleOutcome::Applied
            }
            Err(e) => HandleOutcome::permanent(e.to_string()),
        }
    }
}

//! Outbox worker behavior: retries, dead-lettering, classification and scheduling.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use refundsync_ai::{EstimatorError, EtaEstimate, EtaEstimator, UnconfiguredEstimator};
use refundsync_core::{
    NewOutboxEntry, NewPrediction, OutboxEntry, OutboxEntryId, Prediction, PredictionKey, RecordKey,
    RefundRecord, RefundStatus, StatusTransition, UserId,
};
use refundsync_events::OutboxEventHandler;
use refundsync_infra::outbox::{EtaPredictionHandler, OutboxWorker};
use refundsync_infra::store::{InMemoryRefundStore, InsertOutcome, RefundStore, StoreError};
use refundsync_infra::OutboxConfig;

use common::{Harness, ScriptedEstimator};

fn outbox(max_attempts: u32) -> OutboxConfig {
    OutboxConfig {
        max_attempts,
        poll_interval: Duration::from_millis(20),
        ..OutboxConfig::default()
    }
}

async fn enqueue_status(h: &Harness, status: RefundStatus) -> UserId {
    let user = UserId::new();
    h.upstream_reports(user, status);
    h.sync.get_latest_status(user).await.unwrap();
    user
}

#[tokio::test]
async fn transient_failures_are_retried_then_dead_lettered() {
    let h = Harness::with(ScriptedEstimator::days(7, "v1"), outbox(3));
    for _ in 0..3 {
        h.estimator.push_error(EstimatorError::Timeout);
    }
    enqueue_status(&h, RefundStatus::Processing).await;

    let first = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(first.retried, 1);
    let second = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(second.retried, 1);
    let third = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(third.dead_lettered, 1);

    let entry = h.store.all_outbox_entries().pop().unwrap();
    assert_eq!(entry.attempts, 3);
    assert!(entry.is_dead_lettered());
    assert!(!entry.is_processed());
    assert_eq!(entry.last_error.as_deref(), Some("estimator timed out"));

    let idle = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(idle.selected, 0);

    let dead = h.store.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);

    assert!(h.store.requeue_outbox_entry(entry.id).await.unwrap());
    let retry = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(retry.applied, 1);
    assert_eq!(h.store.all_predictions().len(), 1);
    assert!(h.store.dead_letters(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn rejected_requests_are_permanent_failures() {
    let h = Harness::new();
    h.estimator.push_error(EstimatorError::Rejected {
        status: 422,
        message: "unsupported status".to_string(),
    });
    enqueue_status(&h, RefundStatus::Approved).await;

    let report = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(report.permanent, 1);

    let entry = h.store.all_outbox_entries().pop().unwrap();
    assert!(entry.is_processed());
    assert_eq!(entry.attempts, 1);
    assert!(entry.last_error.unwrap().contains("unsupported status"));
    assert!(h.store.all_predictions().is_empty());
}

#[tokio::test]
async fn server_errors_are_transient() {
    let h = Harness::new();
    h.estimator.push_error(EstimatorError::Status {
        status: 503,
        message: "overloaded".to_string(),
    });
    enqueue_status(&h, RefundStatus::Sent).await;

    let report = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(report.retried, 1);

    let report = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(h.estimator.calls(), 2);
}

#[tokio::test]
async fn untrained_model_is_a_permanent_failure() {
    let h = Harness::new();
    h.estimator.push(Ok(EtaEstimate::unavailable("gbrt", "untrained")));
    enqueue_status(&h, RefundStatus::Received).await;

    let report = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(report.permanent, 1);
    let entry = h.store.all_outbox_entries().pop().unwrap();
    assert!(entry.last_error.unwrap().starts_with("model not trained"));
}

#[tokio::test]
async fn unconfigured_estimator_never_produces_predictions() {
    let h = Harness::new();
    enqueue_status(&h, RefundStatus::Received).await;

    let handler = EtaPredictionHandler::new(
        h.store.clone(),
        Arc::new(UnconfiguredEstimator) as Arc<dyn EtaEstimator>,
        Duration::from_secs(1),
    );
    let worker = OutboxWorker::new(
        h.store.clone(),
        Arc::new(handler) as Arc<dyn OutboxEventHandler>,
        OutboxConfig::default(),
    );

    let report = worker.run_once().await.unwrap().unwrap();
    assert_eq!(report.permanent, 1);
    assert!(h.store.all_predictions().is_empty());
}

#[tokio::test]
async fn unknown_event_types_are_acknowledged_without_side_effects() {
    let h = Harness::new();
    let id = h.store.seed_outbox(NewOutboxEntry {
        event_type: "REFUND_ARCHIVED".to_string(),
        aggregate_key: "x:2025".to_string(),
        payload: serde_json::json!({ "anything": true }),
        created_at: Utc::now(),
    });

    let report = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(h.estimator.calls(), 0);
    let entry = h.store.find_outbox_entry(id).await.unwrap().unwrap();
    assert!(entry.is_processed());
    assert_eq!(entry.attempts, 0);
}

#[tokio::test]
async fn malformed_payloads_are_permanent_failures() {
    let h = Harness::new();
    let id = h.store.seed_outbox(NewOutboxEntry {
        event_type: "REFUND_STATUS_UPDATED".to_string(),
        aggregate_key: "x:2025".to_string(),
        payload: serde_json::json!({ "userId": "not-a-uuid" }),
        created_at: Utc::now(),
    });

    let report = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(report.permanent, 1);
    let entry = h.store.find_outbox_entry(id).await.unwrap().unwrap();
    assert!(entry.is_processed());
    assert!(entry.last_error.is_some());
}

#[tokio::test]
async fn slow_estimator_counts_as_a_transient_timeout() {
    let mut cfg = outbox(20);
    cfg.estimator_timeout = Duration::from_millis(20);
    let h = Harness::with(
        ScriptedEstimator::days(7, "v1").with_delay(Duration::from_millis(500)),
        cfg,
    );
    enqueue_status(&h, RefundStatus::Processing).await;

    let report = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(report.retried, 1);
    assert!(h.store.all_predictions().is_empty());
}

#[tokio::test]
async fn estimator_sees_the_payload_fields() {
    let h = Harness::new();
    let user = enqueue_status(&h, RefundStatus::Approved).await;
    h.worker.run_once().await.unwrap();

    let requests = h.estimator.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].user_id, user);
    assert_eq!(requests[0].status, RefundStatus::Approved);
    assert_eq!(requests[0].filing_state, "CA");
}

#[tokio::test]
async fn overlapping_ticks_are_skipped() {
    let h = Harness::with(
        ScriptedEstimator::days(7, "v1").with_delay(Duration::from_millis(300)),
        outbox(20),
    );
    enqueue_status(&h, RefundStatus::Processing).await;

    let worker = h.worker.clone();
    let running = tokio::spawn(async move { worker.run_once().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.worker.run_once().await.unwrap().is_none());

    let report = running.await.unwrap().unwrap().unwrap();
    assert_eq!(report.applied, 1);
}

#[tokio::test]
async fn batch_size_bounds_each_tick() {
    let mut cfg = outbox(20);
    cfg.batch_size = 2;
    let h = Harness::with(ScriptedEstimator::days(3, "v1"), cfg);
    for _ in 0..3 {
        enqueue_status(&h, RefundStatus::Sent).await;
    }

    let first = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(first.selected, 2);
    let second = h.worker.run_once().await.unwrap().unwrap();
    assert_eq!(second.selected, 1);
}

#[tokio::test]
async fn spawned_worker_drains_the_outbox_and_shuts_down() {
    let h = Harness::with(ScriptedEstimator::days(7, "v1"), outbox(20));
    enqueue_status(&h, RefundStatus::Processing).await;
    enqueue_status(&h, RefundStatus::Approved).await;

    let handle = h.worker.clone().spawn();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.store.all_predictions().len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "worker did not drain the outbox");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    handle.shutdown().await;
    assert!(h.store.all_outbox_entries().iter().all(|e| e.is_processed()));
}

/// Store whose existence check always misses, as when another worker inserts
/// between the check and the insert.
struct LateDuplicateStore {
    inner: Arc<InMemoryRefundStore>,
}

#[async_trait]
impl RefundStore for LateDuplicateStore {
    type Tx = <InMemoryRefundStore as RefundStore>::Tx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        self.inner.begin().await
    }

    async fn find_record(&self, key: RecordKey) -> Result<Option<RefundRecord>, StoreError> {
        self.inner.find_record(key).await
    }

    async fn latest_record_for_user(&self, user_id: UserId) -> Result<Option<RefundRecord>, StoreError> {
        self.inner.latest_record_for_user(user_id).await
    }

    async fn transitions_for(&self, key: RecordKey) -> Result<Vec<StatusTransition>, StoreError> {
        self.inner.transitions_for(key).await
    }

    async fn pending_outbox(&self, max_attempts: u32, limit: usize) -> Result<Vec<OutboxEntryId>, StoreError> {
        self.inner.pending_outbox(max_attempts, limit).await
    }

    async fn find_outbox_entry(&self, id: OutboxEntryId) -> Result<Option<OutboxEntry>, StoreError> {
        self.inner.find_outbox_entry(id).await
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        self.inner.dead_letters(limit).await
    }

    async fn requeue_outbox_entry(&self, id: OutboxEntryId) -> Result<bool, StoreError> {
        self.inner.requeue_outbox_entry(id).await
    }

    async fn prediction_exists(&self, _key: &PredictionKey) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn insert_prediction(&self, prediction: NewPrediction) -> Result<InsertOutcome, StoreError> {
        self.inner.insert_prediction(prediction).await
    }

    async fn predictions_for(&self, key: RecordKey) -> Result<Vec<Prediction>, StoreError> {
        self.inner.predictions_for(key).await
    }
}

#[tokio::test]
async fn duplicate_detected_at_insert_counts_as_already_applied() {
    let h = Harness::new();
    enqueue_status(&h, RefundStatus::Processing).await;
    let first = h.store.all_outbox_entries().pop().unwrap();

    let store = Arc::new(LateDuplicateStore {
        inner: h.store.clone(),
    });
    let handler = EtaPredictionHandler::new(
        store.clone(),
        h.estimator.clone() as Arc<dyn EtaEstimator>,
        Duration::from_secs(1),
    );
    let worker = OutboxWorker::new(
        store,
        Arc::new(handler) as Arc<dyn OutboxEventHandler>,
        OutboxConfig::default(),
    );

    let report = worker.run_once().await.unwrap().unwrap();
    assert_eq!(report.applied, 1);

    let redelivered = h.store.seed_outbox(NewOutboxEntry {
        event_type: first.event_type.clone(),
        aggregate_key: first.aggregate_key.clone(),
        payload: first.payload.clone(),
        created_at: Utc::now(),
    });

    let report = worker.run_once().await.unwrap().unwrap();
    assert_eq!(report.already_applied, 1);
    assert_eq!(h.store.all_predictions().len(), 1);
    assert_eq!(h.estimator.calls(), 2);

    let entry = h.store.find_outbox_entry(redelivered).await.unwrap().unwrap();
    assert!(entry.is_processed());
    assert_eq!(entry.attempts, 1);
    assert!(entry.last_error.unwrap().contains("inserted concurrently"));
}

//! Shared wiring for pipeline tests: in-memory collaborators plus a scripted estimator.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use refundsync_ai::{EstimatorError, EtaDays, EtaEstimate, EtaEstimator, EtaRequest, ModelInfo};
use refundsync_core::{RefundObservation, RefundStatus, TaxYear, UserId};
use refundsync_events::OutboxEventHandler;
use refundsync_infra::cache::{InMemoryStatusCache, StatusCache};
use refundsync_infra::outbox::{EtaPredictionHandler, OutboxWorker};
use refundsync_infra::store::InMemoryRefundStore;
use refundsync_infra::upstream::{SimulatedUpstream, UpstreamSource};
use refundsync_infra::{OutboxConfig, StatusSyncService, SyncConfig};

/// Estimator double: replays scripted answers, then falls back to a fixed ETA.
pub struct ScriptedEstimator {
    script: Mutex<VecDeque<Result<EtaEstimate, EstimatorError>>>,
    fallback_days: u32,
    model_version: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<EtaRequest>>,
}

impl ScriptedEstimator {
    pub fn days(days: u32, model_version: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback_days: days,
            model_version: model_version.to_string(),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, answer: Result<EtaEstimate, EstimatorError>) {
        self.script.lock().unwrap().push_back(answer);
    }

    pub fn push_error(&self, error: EstimatorError) {
        self.push(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<EtaRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl EtaEstimator for ScriptedEstimator {
    async fn predict(&self, request: &EtaRequest) -> Result<EtaEstimate, EstimatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(EtaEstimate {
                eta: EtaDays::Days(self.fallback_days),
                model_name: "scripted".to_string(),
                model_version: self.model_version.clone(),
                features: serde_json::json!({ "status": request.status.as_str() }),
            })
        })
    }

    async fn model_info(&self) -> ModelInfo {
        ModelInfo::new("scripted", &self.model_version)
    }
}

pub struct Harness {
    pub store: Arc<InMemoryRefundStore>,
    pub cache: Arc<InMemoryStatusCache>,
    pub upstream: Arc<SimulatedUpstream>,
    pub estimator: Arc<ScriptedEstimator>,
    pub sync: StatusSyncService<InMemoryRefundStore>,
    pub worker: Arc<OutboxWorker<InMemoryRefundStore>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(ScriptedEstimator::days(7, "v1"), OutboxConfig::default())
    }

    pub fn with(estimator: ScriptedEstimator, outbox: OutboxConfig) -> Self {
        let store = InMemoryRefundStore::arc();
        let cache = Arc::new(InMemoryStatusCache::new());
        let upstream = Arc::new(SimulatedUpstream::new());
        let estimator = Arc::new(estimator);

        let sync = StatusSyncService::new(
            store.clone(),
            cache.clone() as Arc<dyn StatusCache>,
            upstream.clone() as Arc<dyn UpstreamSource>,
            SyncConfig::default(),
        );
        let handler = EtaPredictionHandler::new(
            store.clone(),
            estimator.clone() as Arc<dyn EtaEstimator>,
            outbox.estimator_timeout,
        );
        let worker = Arc::new(OutboxWorker::new(
            store.clone(),
            Arc::new(handler) as Arc<dyn OutboxEventHandler>,
            outbox,
        ));

        Self {
            store,
            cache,
            upstream,
            estimator,
            sync,
            worker,
        }
    }

    /// Force the upstream answer for `user`.
    pub fn upstream_reports(&self, user: UserId, status: RefundStatus) {
        self.upstream.upsert(user, observation(status));
    }
}

pub fn tax_year() -> TaxYear {
    TaxYear::new(2025).unwrap()
}

pub fn observation(status: RefundStatus) -> RefundObservation {
    RefundObservation {
        tax_year: tax_year(),
        status,
        expected_amount: Some(Decimal::new(123456, 2)),
        tracking_id: Some("IRS-123".to_string()),
        filing_state: Some("CA".to_string()),
    }
}

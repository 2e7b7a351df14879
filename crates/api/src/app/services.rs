//! Service wiring: in-memory for dev/tests, Postgres + Redis when persistent
//! stores are configured.

use std::sync::Arc;

use anyhow::Context;

use refundsync_ai::{EtaEstimator, HttpEtaEstimator, ModelInfo, RuleBasedEstimator};
use refundsync_core::{
    OutboxEntry, OutboxEntryId, Prediction, RefundObservation, StatusTransition, UserId,
};
use refundsync_events::OutboxEventHandler;
use refundsync_infra::cache::{InMemoryStatusCache, StatusCache};
use refundsync_infra::outbox::{EtaPredictionHandler, OutboxWorker, OutboxWorkerHandle, TickReport};
use refundsync_infra::store::{InMemoryRefundStore, RefundStore, StoreError};
use refundsync_infra::upstream::{SimulatedUpstream, UpstreamSource};
use refundsync_infra::{AppConfig, StatusResponse, StatusSyncService, SyncError};

#[cfg(feature = "redis")]
use refundsync_infra::{cache::RedisStatusCache, store::PostgresRefundStore};

/// Everything the routes need, for one store backend.
pub struct RefundServices<S: RefundStore> {
    pub sync: StatusSyncService<S>,
    pub worker: Arc<OutboxWorker<S>>,
    pub upstream: Arc<SimulatedUpstream>,
    pub estimator: Arc<dyn EtaEstimator>,
}

impl<S: RefundStore> RefundServices<S> {
    fn wire(
        store: Arc<S>,
        cache: Arc<dyn StatusCache>,
        estimator: Arc<dyn EtaEstimator>,
        config: &AppConfig,
    ) -> Self {
        let upstream = Arc::new(SimulatedUpstream::new());
        let sync = StatusSyncService::new(
            store.clone(),
            cache,
            upstream.clone() as Arc<dyn UpstreamSource>,
            config.sync.clone(),
        );
        let handler = EtaPredictionHandler::new(
            store.clone(),
            estimator.clone(),
            config.outbox.estimator_timeout,
        );
        let worker = Arc::new(OutboxWorker::new(
            store,
            Arc::new(handler) as Arc<dyn OutboxEventHandler>,
            config.outbox.clone(),
        ));

        Self {
            sync,
            worker,
            upstream,
            estimator,
        }
    }

    async fn predictions(&self, user_id: UserId) -> Result<Vec<Prediction>, StoreError> {
        let store = self.sync.store();
        let Some(record) = store.latest_record_for_user(user_id).await? else {
            return Ok(Vec::new());
        };
        store.predictions_for(record.key()).await
    }
}

pub enum AppServices {
    InMemory(RefundServices<InMemoryRefundStore>),
    #[cfg(feature = "redis")]
    Persistent(RefundServices<PostgresRefundStore>),
}

macro_rules! with_services {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            AppServices::InMemory($s) => $body,
            #[cfg(feature = "redis")]
            AppServices::Persistent($s) => $body,
        }
    };
}

impl AppServices {
    /// In-memory stores and cache; nothing survives a restart.
    pub fn in_memory(config: &AppConfig) -> Self {
        Self::in_memory_with_estimator(config, estimator_for(config))
    }

    pub fn in_memory_with_estimator(config: &AppConfig, estimator: Arc<dyn EtaEstimator>) -> Self {
        AppServices::InMemory(RefundServices::wire(
            InMemoryRefundStore::arc(),
            Arc::new(InMemoryStatusCache::new()),
            estimator,
            config,
        ))
    }

    pub async fn latest_status(&self, user_id: UserId) -> Result<StatusResponse, SyncError> {
        with_services!(self, s => s.sync.get_latest_status(user_id).await)
    }

    pub async fn history(&self, user_id: UserId) -> Result<Vec<StatusTransition>, SyncError> {
        with_services!(self, s => s.sync.history(user_id).await)
    }

    pub async fn predictions(&self, user_id: UserId) -> Result<Vec<Prediction>, StoreError> {
        with_services!(self, s => s.predictions(user_id).await)
    }

    /// Force the upstream's next answer for `user_id`.
    pub fn simulate(&self, user_id: UserId, observation: RefundObservation) {
        with_services!(self, s => s.upstream.upsert(user_id, observation))
    }

    pub async fn model_info(&self) -> ModelInfo {
        with_services!(self, s => s.estimator.model_info().await)
    }

    pub async fn run_outbox_tick(&self) -> Result<Option<TickReport>, StoreError> {
        with_services!(self, s => s.worker.run_once().await)
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxEntry>, StoreError> {
        with_services!(self, s => s.sync.store().dead_letters(limit).await)
    }

    pub async fn requeue(&self, id: OutboxEntryId) -> Result<bool, StoreError> {
        with_services!(self, s => s.sync.store().requeue_outbox_entry(id).await)
    }

    pub fn spawn_outbox_worker(&self) -> OutboxWorkerHandle {
        with_services!(self, s => s.worker.clone().spawn())
    }
}

fn estimator_for(config: &AppConfig) -> Arc<dyn EtaEstimator> {
    match &config.ml_base_url {
        Some(url) => {
            tracing::info!(ml_base_url = %url, "using remote ETA estimator");
            Arc::new(HttpEtaEstimator::with_timeout(url.clone(), config.outbox.estimator_timeout))
        }
        None => {
            tracing::info!("ML_BASE_URL not set; using rule-based ETA estimator");
            Arc::new(RuleBasedEstimator::new())
        }
    }
}

/// Wire services from configuration.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    match &config.persistence {
        None => {
            tracing::info!("using in-memory stores");
            Ok(AppServices::in_memory(config))
        }
        #[cfg(feature = "redis")]
        Some(persistence) => {
            let store = PostgresRefundStore::connect(&persistence.database_url)
                .await
                .context("failed to connect to Postgres")?;
            let cache = RedisStatusCache::connect(&persistence.redis_url)
                .await
                .context("failed to connect to Redis")?;
            tracing::info!("using Postgres store and Redis cache");

            Ok(AppServices::Persistent(RefundServices::wire(
                Arc::new(store),
                Arc::new(cache),
                estimator_for(config),
                config,
            )))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
            Ok(AppServices::in_memory(config))
        }
    }
}

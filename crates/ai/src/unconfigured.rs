use async_trait::async_trait;

use crate::estimator::{EstimatorError, EtaEstimate, EtaEstimator, EtaRequest, ModelInfo};

/// Estimator used when no model is wired in: every prediction is the sentinel.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredEstimator;

#[async_trait]
impl EtaEstimator for UnconfiguredEstimator {
    async fn predict(&self, _request: &EtaRequest) -> Result<EtaEstimate, EstimatorError> {
        Ok(EtaEstimate::unavailable("none", "unconfigured"))
    }

    async fn model_info(&self) -> ModelInfo {
        ModelInfo::unavailable()
    }
}

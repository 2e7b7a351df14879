use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;

use refundsync_core::RefundStatus;

use crate::estimator::{EstimatorError, EtaDays, EtaEstimate, EtaEstimator, EtaRequest, ModelInfo, MAX_ETA_DAYS};

/// Deterministic in-process ETA model.
///
/// Model:
/// - Each status has a base number of days until the refund is available.
/// - Larger refunds take longer: one extra day per `amount_step` of expected amount.
/// - The result is capped at `MAX_ETA_DAYS`.
/// - `NOT_FOUND` has no meaningful ETA and yields `EtaDays::Unavailable`.
#[derive(Debug, Clone)]
pub struct RuleBasedEstimator {
    model_version: String,
    amount_step: Decimal,
}

impl Default for RuleBasedEstimator {
    fn default() -> Self {
        Self {
            model_version: "v1".to_string(),
            amount_step: Decimal::new(5000, 0),
        }
    }
}

impl RuleBasedEstimator {
    pub const MODEL_NAME: &'static str = "rules";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = version.into();
        self
    }

    pub fn with_amount_step(mut self, step: Decimal) -> Self {
        self.amount_step = step;
        self
    }

    fn base_days(status: RefundStatus) -> Option<u32> {
        match status {
            RefundStatus::NotFound => None,
            RefundStatus::Received => Some(21),
            RefundStatus::Processing => Some(14),
            RefundStatus::Approved => Some(7),
            RefundStatus::Sent => Some(3),
            RefundStatus::Available | RefundStatus::Rejected => Some(0),
        }
    }

    fn amount_days(&self, amount: Option<Decimal>) -> u32 {
        let Some(amount) = amount else {
            return 0;
        };
        if self.amount_step <= Decimal::ZERO || amount <= Decimal::ZERO {
            return 0;
        }
        (amount / self.amount_step)
            .floor()
            .min(Decimal::from(MAX_ETA_DAYS))
            .try_into()
            .unwrap_or(MAX_ETA_DAYS)
    }
}

#[async_trait]
impl EtaEstimator for RuleBasedEstimator {
    async fn predict(&self, request: &EtaRequest) -> Result<EtaEstimate, EstimatorError> {
        let Some(base) = Self::base_days(request.status) else {
            return Ok(EtaEstimate::unavailable(Self::MODEL_NAME, &self.model_version));
        };
        let extra = self.amount_days(request.expected_amount);
        let eta = EtaDays::Days(base.saturating_add(extra).min(MAX_ETA_DAYS));

        Ok(EtaEstimate {
            eta,
            model_name: Self::MODEL_NAME.to_string(),
            model_version: self.model_version.clone(),
            features: json!({
                "status": request.status.as_str(),
                "filing_state": request.filing_state,
                "expected_amount": request.expected_amount,
                "base_days": base,
                "amount_days": extra,
            }),
        })
    }

    async fn model_info(&self) -> ModelInfo {
        ModelInfo::new(Self::MODEL_NAME, &self.model_version)
    }
}

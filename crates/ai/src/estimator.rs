use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use refundsync_core::{RefundStatus, TaxYear, UserId};

/// Upper bound on a reported ETA, in days.
pub const MAX_ETA_DAYS: u32 = 365;

/// Inputs the estimator sees for one refund status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtaRequest {
    pub user_id: UserId,
    pub tax_year: TaxYear,
    pub status: RefundStatus,
    pub filing_state: String,
    pub expected_amount: Option<Decimal>,
}

/// Estimated days until the refund becomes available.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EtaDays {
    Days(u32),
    /// The model is not configured or not trained yet.
    Unavailable,
}

impl EtaDays {
    /// Clamp a raw model output into `0..=MAX_ETA_DAYS`.
    pub fn clamped(raw: i64) -> Self {
        EtaDays::Days(raw.clamp(0, MAX_ETA_DAYS as i64) as u32)
    }
}

/// One estimator answer.
#[derive(Debug, Clone, PartialEq)]
pub struct EtaEstimate {
    pub eta: EtaDays,
    pub model_name: String,
    pub model_version: String,
    /// Feature snapshot the model used (persisted alongside the prediction).
    pub features: JsonValue,
}

impl EtaEstimate {
    pub fn unavailable(model_name: impl Into<String>, model_version: impl Into<String>) -> Self {
        Self {
            eta: EtaDays::Unavailable,
            model_name: model_name.into(),
            model_version: model_version.into(),
            features: JsonValue::Object(Default::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model_name: String,
    pub model_version: String,
}

impl ModelInfo {
    pub fn new(model_name: impl Into<String>, model_version: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            model_version: model_version.into(),
        }
    }

    /// Reported when the estimator cannot be reached.
    pub fn unavailable() -> Self {
        Self::new("unknown", "unavailable")
    }
}

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("estimator transport error: {0}")]
    Transport(String),

    #[error("estimator timed out")]
    Timeout,

    /// Server-side failure (5xx).
    #[error("estimator returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The estimator refused the request (4xx other than "not trained").
    #[error("estimator rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("failed to parse estimator response: {0}")]
    Parse(String),
}

impl EstimatorError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, EstimatorError::Rejected { .. })
    }
}

/// Estimated-time-of-availability model.
#[async_trait]
pub trait EtaEstimator: Send + Sync {
    async fn predict(&self, request: &EtaRequest) -> Result<EtaEstimate, EstimatorError>;

    /// Current model identity. Never fails: falls back to `ModelInfo::unavailable()`.
    async fn model_info(&self) -> ModelInfo;
}

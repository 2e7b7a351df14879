//! Memoized ETA predictions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::{TaxYear, UserId};
use crate::status::RefundStatus;

/// Uniqueness key of a prediction: one row per model output for a status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PredictionKey {
    pub user_id: UserId,
    pub tax_year: TaxYear,
    pub status: RefundStatus,
    pub model_version: String,
}

/// A prediction about to be inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPrediction {
    pub user_id: UserId,
    pub tax_year: TaxYear,
    pub status: RefundStatus,
    pub eta_days: u32,
    pub estimated_available_at: DateTime<Utc>,
    pub model_name: String,
    pub model_version: String,
    /// Feature snapshot echoed back by the estimator.
    pub features: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl NewPrediction {
    pub fn key(&self) -> PredictionKey {
        PredictionKey {
            user_id: self.user_id,
            tax_year: self.tax_year,
            status: self.status,
            model_version: self.model_version.clone(),
        }
    }
}

/// A persisted, immutable prediction row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: i64,
    pub user_id: UserId,
    pub tax_year: TaxYear,
    pub status: RefundStatus,
    pub eta_days: u32,
    pub estimated_available_at: DateTime<Utc>,
    pub model_name: String,
    pub model_version: String,
    pub features: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl Prediction {
    pub fn from_new(id: i64, new: NewPrediction) -> Self {
        Self {
            id,
            user_id: new.user_id,
            tax_year: new.tax_year,
            status: new.status,
            eta_days: new.eta_days,
            estimated_available_at: new.estimated_available_at,
            model_name: new.model_name,
            model_version: new.model_version,
            features: new.features,
            created_at: new.created_at,
        }
    }

    pub fn key(&self) -> PredictionKey {
        PredictionKey {
            user_id: self.user_id,
            tax_year: self.tax_year,
            status: self.status,
            model_version: self.model_version.clone(),
        }
    }
}

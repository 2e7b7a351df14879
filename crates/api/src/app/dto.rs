use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use refundsync_core::{OutboxEntry, RefundObservation, RefundStatus, TaxYear};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Forced upstream answer for the calling user.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateRequest {
    pub tax_year: i32,
    pub status: String,
    pub expected_amount: Option<Decimal>,
    pub tracking_id: Option<String>,
    pub filing_state: Option<String>,
}

impl SimulateRequest {
    pub fn into_observation(self) -> Result<RefundObservation, axum::response::Response> {
        let tax_year = TaxYear::new(self.tax_year).map_err(|e| errors::validation_error(e.to_string()))?;
        let status: RefundStatus = self
            .status
            .parse()
            .map_err(|e: refundsync_core::DomainError| errors::validation_error(e.to_string()))?;

        if let Some(amount) = self.expected_amount {
            if amount.is_sign_negative() {
                return Err(errors::validation_error("expectedAmount must not be negative"));
            }
        }

        let filing_state = self
            .filing_state
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty());
        if let Some(state) = &filing_state {
            if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(errors::validation_error("filingState must be a two-letter code"));
            }
        }

        Ok(RefundObservation {
            tax_year,
            status,
            expected_amount: self.expected_amount,
            tracking_id: self.tracking_id,
            filing_state,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntryView {
    pub id: i64,
    pub event_type: String,
    pub aggregate_key: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub failed_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
}

impl From<OutboxEntry> for OutboxEntryView {
    fn from(e: OutboxEntry) -> Self {
        Self {
            id: e.id.0,
            event_type: e.event_type,
            aggregate_key: e.aggregate_key,
            attempts: e.attempts,
            last_error: e.last_error,
            created_at: e.created_at,
            failed_at: e.failed_at,
            payload: e.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(status: &str, filing_state: Option<&str>) -> SimulateRequest {
        SimulateRequest {
            tax_year: 2025,
            status: status.to_string(),
            expected_amount: Some(Decimal::new(50000, 2)),
            tracking_id: Some("T-1".to_string()),
            filing_state: filing_state.map(str::to_string),
        }
    }

    #[test]
    fn builds_an_observation() {
        let obs = request("PROCESSING", Some("ny")).into_observation().unwrap();
        assert_eq!(obs.status, RefundStatus::Processing);
        assert_eq!(obs.tax_year.value(), 2025);
        assert_eq!(obs.filing_state.as_deref(), Some("NY"));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(request("LOST", None).into_observation().is_err());
        assert!(request("SENT", Some("New York")).into_observation().is_err());

        let mut bad_year = request("SENT", None);
        bad_year.tax_year = 12;
        assert!(bad_year.into_observation().is_err());

        let mut negative = request("SENT", None);
        negative.expected_amount = Some(Decimal::new(-1, 0));
        assert!(negative.into_observation().is_err());
    }
}

//! Refund record: current status per (user, tax year).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::id::{RecordKey, TaxYear, UserId};
use crate::status::RefundStatus;
use crate::transition::{StatusTransition, TransitionSource};

/// What the upstream source currently reports for a user's most recent refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundObservation {
    pub tax_year: TaxYear,
    pub status: RefundStatus,
    pub expected_amount: Option<Decimal>,
    pub tracking_id: Option<String>,
    /// Two-letter filing state (jurisdiction tag), when known.
    pub filing_state: Option<String>,
}

/// Current refund state for one (user, tax year).
///
/// Last-write-wins: `status` always holds the most recently observed upstream value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub user_id: UserId,
    pub tax_year: TaxYear,
    pub status: RefundStatus,
    pub expected_amount: Option<Decimal>,
    pub tracking_id: Option<String>,
    pub filing_state: Option<String>,
    pub last_updated_at: DateTime<Utc>,
    /// Last known ETA, carried forward until a fresher prediction exists.
    pub estimated_available_at: Option<DateTime<Utc>>,
}

/// Outcome of folding one observation into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    pub record: RefundRecord,
    /// Present only when the status changed (or this is the first observation).
    pub transition: Option<StatusTransition>,
}

impl RefundRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.user_id, self.tax_year)
    }

    /// Fold an upstream observation into the (possibly absent) current record.
    ///
    /// A missing record is created from the observation and always yields a
    /// transition with `from_status = None`. An existing record with the same
    /// status only refreshes amount, tracking id and timestamp.
    pub fn observe(
        existing: Option<RefundRecord>,
        user_id: UserId,
        observation: &RefundObservation,
        source: TransitionSource,
        now: DateTime<Utc>,
    ) -> Observed {
        let (mut record, previous) = match existing {
            Some(r) => {
                let previous = r.status;
                (r, Some(previous))
            }
            None => (
                RefundRecord {
                    user_id,
                    tax_year: observation.tax_year,
                    status: observation.status,
                    expected_amount: None,
                    tracking_id: None,
                    filing_state: None,
                    last_updated_at: now,
                    estimated_available_at: None,
                },
                None,
            ),
        };

        record.status = observation.status;
        record.expected_amount = observation.expected_amount;
        record.tracking_id = observation.tracking_id.clone();
        if observation.filing_state.is_some() {
            record.filing_state = observation.filing_state.clone();
        }
        record.last_updated_at = now;

        let transition = if previous == Some(record.status) {
            None
        } else {
            Some(StatusTransition {
                user_id: record.user_id,
                tax_year: record.tax_year,
                filing_state: record.filing_state.clone(),
                from_status: previous,
                to_status: record.status,
                expected_amount: record.expected_amount,
                tracking_id: record.tracking_id.clone(),
                source,
                occurred_at: now,
            })
        };

        Observed { record, transition }
    }

    /// Adopt a fresher ETA (from a persisted prediction) as the carried-forward estimate.
    pub fn carry_estimate(&mut self, estimated_available_at: DateTime<Utc>) {
        self.estimated_available_at = Some(estimated_available_at);
    }
}

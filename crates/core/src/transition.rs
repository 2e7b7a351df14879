use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::id::{TaxYear, UserId};
use crate::status::RefundStatus;

/// Where an observed status came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionSource {
    /// Live read from the tax authority adapter.
    Irs,
    /// Forced through the simulation endpoint.
    Simulation,
}

impl TransitionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionSource::Irs => "IRS",
            TransitionSource::Simulation => "SIMULATION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IRS" => Some(TransitionSource::Irs),
            "SIMULATION" => Some(TransitionSource::Simulation),
            _ => None,
        }
    }
}

/// An observed status change (immutable audit fact).
///
/// `from_status` is `None` for the first-ever observation of a (user, year).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransition {
    pub user_id: UserId,
    pub tax_year: TaxYear,
    pub filing_state: Option<String>,
    pub from_status: Option<RefundStatus>,
    pub to_status: RefundStatus,
    pub expected_amount: Option<Decimal>,
    pub tracking_id: Option<String>,
    pub source: TransitionSource,
    pub occurred_at: DateTime<Utc>,
}

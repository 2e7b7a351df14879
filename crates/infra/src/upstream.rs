//! Upstream source of truth for refund status (the tax authority).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use refundsync_core::{RefundObservation, RefundStatus, TaxYear, TransitionSource, UserId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("upstream timed out")]
    Timeout,

    #[error("no refund on file for user {0}")]
    NotFound(UserId),
}

/// What the upstream reported, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRefund {
    pub observation: RefundObservation,
    pub source: TransitionSource,
}

#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// The user's most recent refund as currently known upstream.
    async fn fetch_latest(&self, user_id: UserId) -> Result<UpstreamRefund, UpstreamError>;
}

/// Stand-in for the tax authority used in dev and tests.
///
/// Users without a forced response get a fixed "received" refund. Responses set
/// through [`SimulatedUpstream::upsert`] are reported with the `SIMULATION` source.
#[derive(Debug)]
pub struct SimulatedUpstream {
    responses: RwLock<HashMap<UserId, RefundObservation>>,
    outage: AtomicBool,
    default_tax_year: TaxYear,
}

impl Default for SimulatedUpstream {
    fn default() -> Self {
        Self {
            responses: RwLock::new(HashMap::new()),
            outage: AtomicBool::new(false),
            default_tax_year: TaxYear::from_stored(2025),
        }
    }
}

impl SimulatedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the next responses for `user_id`.
    pub fn upsert(&self, user_id: UserId, observation: RefundObservation) {
        self.responses
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(user_id, observation);
    }

    /// Make every fetch fail with `Unavailable` until switched back.
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    fn default_observation(&self, user_id: UserId) -> RefundObservation {
        RefundObservation {
            tax_year: self.default_tax_year,
            status: RefundStatus::Received,
            expected_amount: Some(Decimal::new(123456, 2)),
            tracking_id: Some(format!("MOCK-{user_id}")),
            filing_state: None,
        }
    }
}

#[async_trait]
impl UpstreamSource for SimulatedUpstream {
    async fn fetch_latest(&self, user_id: UserId) -> Result<UpstreamRefund, UpstreamError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(UpstreamError::Unavailable("simulated outage".to_string()));
        }

        let forced = self
            .responses
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&user_id)
            .cloned();

        Ok(match forced {
            Some(observation) => UpstreamRefund {
                observation,
                source: TransitionSource::Simulation,
            },
            None => UpstreamRefund {
                observation: self.default_observation(user_id),
                source: TransitionSource::Irs,
            },
        })
    }
}

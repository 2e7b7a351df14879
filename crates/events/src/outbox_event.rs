//! Tagged union of outbox event kinds.
//!
//! The store keeps `(event_type, payload)` as an opaque pair. This module owns the
//! mapping in both directions: one payload shape per recognized type, and
//! unknown types decode to `None` so newer producers never break older consumers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use refundsync_core::{NewOutboxEntry, OutboxEntry, RecordKey, RefundStatus, StatusTransition, TaxYear, UserId};

use crate::event::Event;

/// Event type tag for a refund status change.
pub const REFUND_STATUS_UPDATED: &str = "REFUND_STATUS_UPDATED";

/// Region tag used when the filing state is unknown.
pub const UNKNOWN_FILING_STATE: &str = "NA";

/// Payload of `REFUND_STATUS_UPDATED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdated {
    pub user_id: UserId,
    pub tax_year: TaxYear,
    #[serde(default = "unknown_filing_state")]
    pub filing_state: String,
    pub status: RefundStatus,
    #[serde(default)]
    pub expected_amount: Option<Decimal>,
    #[serde(default)]
    pub tracking_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

fn unknown_filing_state() -> String {
    UNKNOWN_FILING_STATE.to_string()
}

impl StatusUpdated {
    /// Snapshot a transition into the outbox payload.
    pub fn from_transition(t: &StatusTransition) -> Self {
        Self {
            user_id: t.user_id,
            tax_year: t.tax_year,
            filing_state: t
                .filing_state
                .clone()
                .unwrap_or_else(unknown_filing_state),
            status: t.to_status,
            expected_amount: t.expected_amount,
            tracking_id: t.tracking_id.clone(),
            occurred_at: t.occurred_at,
        }
    }

    pub fn record_key(&self) -> RecordKey {
        RecordKey::new(self.user_id, self.tax_year)
    }
}

/// Every outbox event kind this build understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxEvent {
    RefundStatusUpdated(StatusUpdated),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {event_type} payload: {source}")]
    Payload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {event_type} payload: {source}")]
    Encode {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl Event for OutboxEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OutboxEvent::RefundStatusUpdated(_) => REFUND_STATUS_UPDATED,
        }
    }
}

impl OutboxEvent {
    pub fn status_updated(transition: &StatusTransition) -> Self {
        OutboxEvent::RefundStatusUpdated(StatusUpdated::from_transition(transition))
    }

    pub fn aggregate_key(&self) -> String {
        match self {
            OutboxEvent::RefundStatusUpdated(e) => e.record_key().aggregate_key(),
        }
    }

    pub fn payload(&self) -> Result<JsonValue, DecodeError> {
        let encoded = match self {
            OutboxEvent::RefundStatusUpdated(e) => serde_json::to_value(e),
        };
        encoded.map_err(|source| DecodeError::Encode {
            event_type: self.event_type(),
            source,
        })
    }

    /// Build the store-level entry for this event.
    pub fn to_outbox_entry(&self, created_at: DateTime<Utc>) -> Result<NewOutboxEntry, DecodeError> {
        Ok(NewOutboxEntry {
            event_type: self.event_type().to_string(),
            aggregate_key: self.aggregate_key(),
            payload: self.payload()?,
            created_at,
        })
    }

    /// Decode a stored `(event_type, payload)` pair.
    ///
    /// Returns `Ok(None)` for event types this build does not recognize.
    pub fn decode(event_type: &str, payload: &JsonValue) -> Result<Option<Self>, DecodeError> {
        match event_type {
            REFUND_STATUS_UPDATED => StatusUpdated::deserialize(payload)
                .map(|e| Some(OutboxEvent::RefundStatusUpdated(e)))
                .map_err(|source| DecodeError::Payload {
                    event_type: event_type.to_string(),
                    source,
                }),
            _ => Ok(None),
        }
    }

    pub fn decode_entry(entry: &OutboxEntry) -> Result<Option<Self>, DecodeError> {
        Self::decode(&entry.event_type, &entry.payload)
    }
}

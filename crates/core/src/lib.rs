//! `refundsync-core`: refund status domain building blocks.
//!
//! This crate contains **pure domain** types (no infrastructure concerns): the
//! per-user refund record, the transitions it emits, outbox entries and memoized
//! ETA predictions. Storage, caching and network collaborators live in
//! `refundsync-infra`.

pub mod error;
pub mod id;
pub mod outbox;
pub mod prediction;
pub mod record;
pub mod status;
pub mod transition;

pub use error::{DomainError, DomainResult};
pub use id::{OutboxEntryId, RecordKey, TaxYear, UserId};
pub use outbox::{NewOutboxEntry, OutboxEntry};
pub use prediction::{NewPrediction, Prediction, PredictionKey};
pub use record::{Observed, RefundObservation, RefundRecord};
pub use status::RefundStatus;
pub use transition::{StatusTransition, TransitionSource};

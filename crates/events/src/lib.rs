//! Outbox events and their consumer contract.
//!
//! - `event`: the `Event` trait shared by every outbox event kind
//! - `outbox_event`: the tagged union of recognized event kinds + payload shapes
//! - `handler`: the consumer trait and its explicit outcome type

pub mod event;
pub mod handler;
pub mod outbox_event;

pub use event::Event;
pub use handler::{HandleOutcome, OutboxEventHandler};
pub use outbox_event::{DecodeError, OutboxEvent, StatusUpdated, REFUND_STATUS_UPDATED};

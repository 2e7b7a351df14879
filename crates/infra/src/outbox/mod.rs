//! Outbox consumption: the worker loop and the handlers it dispatches to.

pub mod handler;
pub mod worker;

pub use handler::EtaPredictionHandler;
pub use worker::{apply_outcome, EntryResult, OutboxWorker, OutboxWorkerHandle, TickReport};

//! HTTP API: refund status reads, simulation and outbox administration.

pub mod app;
pub mod context;
pub mod middleware;

//! `refundsync-ai`
//!
//! **Responsibility:** ETA estimator boundary.
//!
//! This crate is intentionally **not** part of the domain model:
//! - It must not depend on storage or mutate domain state.
//! - It answers "how many days until this refund is available?" and nothing else.
//! - "Model not ready" is a normal answer (`EtaDays::Unavailable`), not an error.

pub mod estimator;
pub mod http;
pub mod rules;
pub mod unconfigured;

pub use estimator::{EstimatorError, EtaDays, EtaEstimate, EtaEstimator, EtaRequest, ModelInfo, MAX_ETA_DAYS};
pub use http::HttpEtaEstimator;
pub use rules::RuleBasedEstimator;
pub use unconfigured::UnconfiguredEstimator;

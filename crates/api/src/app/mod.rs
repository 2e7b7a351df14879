//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, cache, upstream, estimator and outbox worker
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response shapes
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router around already-wired services.
pub fn build_app(services: Arc<AppServices>) -> Router {
    // Caller-scoped routes need an identity.
    let refund = routes::refund::router()
        .layer(axum::middleware::from_fn(middleware::identity_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/refund", refund)
        .nest("/ml", routes::ml::router())
        .nest("/admin", routes::admin::router())
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/latest", get(latest))
        .route("/simulate", post(simulate))
        .route("/history", get(history))
        .route("/predictions", get(predictions))
}

pub async fn latest(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.latest_status(user.user_id()).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => errors::sync_error_to_response(e),
    }
}

pub async fn simulate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Json(body): Json<dto::SimulateRequest>,
) -> axum::response::Response {
    let observation = match body.into_observation() {
        Ok(o) => o,
        Err(resp) => return resp,
    };

    tracing::info!(
        user_id = %user.user_id(),
        status = %observation.status,
        tax_year = observation.tax_year.value(),
        "upstream response simulated"
    );
    services.simulate(user.user_id(), observation);
    StatusCode::NO_CONTENT.into_response()
}

pub async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.history(user.user_id()).await {
        Ok(transitions) => Json(transitions).into_response(),
        Err(e) => errors::sync_error_to_response(e),
    }
}

pub async fn predictions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.predictions(user.user_id()).await {
        Ok(predictions) => Json(predictions).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, routing::get, Json, Router};

use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/model-info", get(model_info))
}

/// Name and version of the model serving ETA predictions.
pub async fn model_info(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(services.model_info().await)
}

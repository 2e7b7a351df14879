//! Outbox administration: manual ticks and dead-letter handling.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use refundsync_core::OutboxEntryId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

const DEFAULT_DEAD_LETTER_LIMIT: usize = 100;
const MAX_DEAD_LETTER_LIMIT: usize = 1000;

pub fn router() -> Router {
    Router::new()
        .route("/outbox/tick", post(tick))
        .route("/outbox/dead-letters", get(dead_letters))
        .route("/outbox/:id/requeue", post(requeue))
}

/// Run one worker tick now.
pub async fn tick(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.run_outbox_tick().await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::CONFLICT,
            "tick_in_progress",
            "an outbox tick is already running",
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::DeadLetterQuery>,
) -> axum::response::Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DEAD_LETTER_LIMIT)
        .clamp(1, MAX_DEAD_LETTER_LIMIT);

    match services.dead_letters(limit).await {
        Ok(entries) => {
            let views: Vec<dto::OutboxEntryView> = entries.into_iter().map(Into::into).collect();
            Json(views).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn requeue(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match id.parse::<i64>() {
        Ok(v) => OutboxEntryId(v),
        Err(_) => return errors::validation_error("outbox id must be an integer"),
    };

    match services.requeue(id).await {
        Ok(true) => {
            tracing::info!(outbox_id = id.0, "dead-lettered outbox entry requeued");
            (StatusCode::OK, Json(serde_json::json!({ "id": id.0, "requeued": true }))).into_response()
        }
        Ok(false) => errors::json_error(
            StatusCode::CONFLICT,
            "not_dead_lettered",
            format!("outbox entry {id} is not dead-lettered"),
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}

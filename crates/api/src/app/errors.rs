use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use refundsync_infra::store::StoreError;
use refundsync_infra::upstream::UpstreamError;
use refundsync_infra::SyncError;

pub fn sync_error_to_response(err: SyncError) -> axum::response::Response {
    match err {
        SyncError::Upstream(UpstreamError::NotFound(_)) => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        SyncError::Upstream(e) => json_error(StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable", e.to_string()),
        SyncError::Store(e) => store_error_to_response(e),
        SyncError::Serialization(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "serialization_error", msg)
        }
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        StoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        e => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn validation_error(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

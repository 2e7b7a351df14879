use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use refundsync_core::UserId;

use crate::app::errors::json_error;
use crate::context::UserContext;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Resolve the caller from `X-User-Id` and attach a [`UserContext`].
pub async fn identity_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let user_id = match extract_user_id(req.headers()) {
        Ok(id) => id,
        Err(message) => return json_error(StatusCode::UNAUTHORIZED, "unauthenticated", message),
    };

    req.extensions_mut().insert(UserContext::new(user_id));
    next.run(req).await
}

fn extract_user_id(headers: &HeaderMap) -> Result<UserId, &'static str> {
    let header = headers
        .get(USER_ID_HEADER)
        .ok_or("missing X-User-Id header")?;

    let raw = header.to_str().map_err(|_| "X-User-Id is not valid text")?;
    if raw.trim().is_empty() {
        return Err("missing X-User-Id header");
    }

    raw.parse().map_err(|_| "X-User-Id must be a UUID")
}

//! Authentication middleware.
//!
//! Every route except `/health` requires the `X-Api-User` / `X-Api-Key`
//! headers to resolve against the user store; admin routes additionally
//! require the admin role. Invalid credentials answer 403.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::ApiState;

fn header<'a>(request: &'a Request, name: &str) -> &'a str {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Validate the API credentials carried in the request headers.
pub async fn require_auth(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let user = header(&request, "X-Api-User");
    let key = header(&request, "X-Api-Key");
    debug!(user, "authenticating request");

    match state.users.check_key(user, key) {
        Ok(true) => next.run(request).await,
        Ok(false) | Err(_) => (StatusCode::FORBIDDEN, "Unauthorized\n").into_response(),
    }
}

/// Require the admin role on top of valid credentials.
pub async fn require_admin(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let user = header(&request, "X-Api-User").to_string();

    match state.users.is_admin(&user) {
        Ok(true) => next.run(request).await,
        Ok(false) => (
            StatusCode::FORBIDDEN,
            format!("User {user} is not an admin\n"),
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

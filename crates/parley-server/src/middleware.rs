//! Bearer-token authentication for REST routes.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use parley_core::AuthError;
use std::sync::Arc;
use tracing::debug;

/// Verify `Authorization: Bearer <token>` and insert the [`parley_core::Identity`]
/// into request extensions. Rejects with 401 when missing or invalid.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = bearer_token(&req)?;
    let identity = state.hub.auth().identify(token)?;

    debug!(user = %identity.user_id, path = %req.uri().path(), "Request authenticated");
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Result<&str, ApiError> {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| ApiError::Unauthorized("Token is invalid".into()))?;

    // Accept a bare token as well as the Bearer scheme.
    Ok(header.strip_prefix("Bearer ").unwrap_or(header).trim())
}

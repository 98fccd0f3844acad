use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use crate::auth::verify_token;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Pull the bearer token out of an `Authorization` header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Extract and validate the JWT, then inject its `Claims` for the handler.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = bearer_token(req.headers()).ok_or(ApiError::Unauthenticated)?;
    let claims = verify_token(&state.auth, token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

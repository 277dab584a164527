//! Bearer token authentication middleware.
//!
//! Extracts `Authorization: Bearer <token>`, resolves it through the
//! configured [`TokenVerifier`](crate::auth::TokenVerifier) and injects the
//! [`Caller`] into request extensions for the handlers.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::error::ApiError;
use super::AppState;
use crate::auth::Caller;

pub async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match require_auth_inner(state, req, next).await {
        Ok(resp) => resp,
        Err(err) => {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            err.into_response()
        }
    }
}

async fn require_auth_inner(state: AppState, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthenticated)?;

    let caller: Caller = state
        .verifier
        .verify(token)
        .await
        .ok_or(ApiError::Unauthenticated)?;
    tracing::debug!(uid = %caller.uid, "authenticated");

    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

// src/router/auth_middleware.rs
// Bearer-token gate for the REST surface (spec §6 "all under /api...
// `Authorization: Bearer <token>`"), mirroring the teacher's
// `middleware::auth` layer but checking against the single process-wide
// token instead of a per-user JWT.

use crate::auth;
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

pub async fn require_bearer(State(state): State<AppState>, request: Request<axum::body::Body>, next: Next) -> Result<Response, AppError> {
    let presented = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(auth::extract_bearer)
        .ok_or(AppError::Unauthorized)?;

    if !auth::tokens_match(&state.token, presented) {
        return Err(AppError::Unauthorized);
    }
    Ok(next.run(request).await)
}

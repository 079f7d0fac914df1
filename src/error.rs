// src/error.rs
// Closed, client-facing error type (spec §7). Kept separate from the
// internal `anyhow::Error` style still used for setup-time failures in
// `main`, the way the teacher keeps `TerminalError`/`AuthError` closed at
// their respective boundaries while using `anyhow` internally elsewhere.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("busy")]
    Busy,
    #[error("at capacity")]
    Capacity,
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("child process failed: {0}")]
    ChildFailed(String),
    #[error("io error: {0}")]
    IOError(String),
    #[error("backpressure dropped subscriber")]
    BackpressureDropped,
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "Unauthorized",
            AppError::NotFound(_) => "NotFound",
            AppError::Conflict(_) => "Conflict",
            AppError::Busy => "Busy",
            AppError::Capacity => "Capacity",
            AppError::ParseError(_) => "ParseError",
            AppError::ChildFailed(_) => "ChildFailed",
            AppError::IOError(_) => "IOError",
            AppError::BackpressureDropped => "BackpressureDropped",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Busy => StatusCode::TOO_MANY_REQUESTS,
            AppError::Capacity => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ParseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ChildFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BackpressureDropped => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
            other => AppError::IOError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::IOError(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

//! Shared application state threaded through axum extractors, and the
//! crate-wide error type both surfaces convert into, mirroring the teacher's
//! `app_state::AppState`/`AppError`.

use std::fmt::Display;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::client::NeighbourClient;
use crate::config::PeerConfig;
use crate::metrics::MetricsSink;
use crate::peer_state::PeerState;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: &'static PeerConfig,
    pub peer_state: &'static PeerState,
    pub metrics: &'static MetricsSink,
    pub client: &'static dyn NeighbourClient,
    pub cancellation_token: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    BadRequest,
    RateLimited,
    NotFound,
    Internal,
}

impl From<AppErrorKind> for StatusCode {
    fn from(kind: AppErrorKind) -> Self {
        match kind {
            AppErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            AppErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppErrorKind::NotFound => StatusCode::NOT_FOUND,
            AppErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub message: String,
    pub kind: AppErrorKind,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: AppErrorKind::BadRequest,
        }
    }

    pub fn rate_limited() -> Self {
        Self {
            message: "Rate limit exceeded".to_string(),
            kind: AppErrorKind::RateLimited,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            kind: AppErrorKind::Internal,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        if self.kind == AppErrorKind::Internal {
            tracing::error!(message = %self.message, "internal error");
        }
        let status: StatusCode = self.kind.into();
        let body = Json(ErrorBody {
            detail: self.message,
        });
        (status, body).into_response()
    }
}

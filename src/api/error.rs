//! HTTP-facing errors. Every failure renders as
//! `{"error": <machine key>, "message": <text>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::domain::repocheck::RepoCheckError;
use crate::domain::upgrade_state::UpgradeError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Upgrade(#[from] UpgradeError),

    #[error(transparent)]
    RepoCheck(#[from] RepoCheckError),

    /// Carries the parse message, which lists the known checks.
    #[error("{0}")]
    UnknownCheck(String),

    #[error("node {0} is not in the inventory")]
    UnknownNode(String),

    #[error("readiness report not yet available (initial checks in progress)")]
    ReportPending,

    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Upgrade(UpgradeError::InProgress) => StatusCode::CONFLICT,
            Self::Upgrade(UpgradeError::LauncherMissing(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Upgrade(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RepoCheck(e) if e.is_service_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::RepoCheck(RepoCheckError::NoAdminNode) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RepoCheck(_) => StatusCode::BAD_GATEWAY,
            Self::UnknownCheck(_) | Self::UnknownNode(_) => StatusCode::NOT_FOUND,
            Self::ReportPending => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::Upgrade(e) => e.key(),
            Self::RepoCheck(e) => e.key(),
            Self::UnknownCheck(_) => "unknown_check",
            Self::UnknownNode(_) => "unknown_node",
            Self::ReportPending => "report_pending",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, key = self.key(), "request failed");
        }
        let body = json!({ "error": self.key(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

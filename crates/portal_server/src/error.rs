//! Maps [`PortalError`] onto HTTP responses.
//!
//! Body shape: `{ "error": <code>, "message": <text> }`. 5xx responses hide
//! the underlying message and carry a `correlation_id` that is logged with
//! the real error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use portal_core::error::PortalError;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug)]
pub struct AppError(pub PortalError);

impl From<PortalError> for AppError {
    fn from(e: PortalError) -> Self {
        Self(e)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        Self(PortalError::Internal(e))
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(PortalError::Validation(message.into()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.0.code();
        let body = if status.is_server_error() {
            let correlation_id = Uuid::new_v4();
            tracing::error!(%correlation_id, error = %self.0, "request failed");
            json!({
                "error": code,
                "message": "an internal error occurred",
                "correlation_id": correlation_id,
            })
        } else {
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                tracing::warn!(code, error = %self.0, "request refused");
            }
            json!({ "error": code, "message": self.0.to_string() })
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::types::ProposalStatus;

    #[test]
    fn status_follows_the_error_taxonomy() {
        assert_eq!(
            AppError(PortalError::PermissionDenied("x".into())).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError(PortalError::AccountLocked(chrono::Utc::now())).status(),
            StatusCode::LOCKED
        );
        assert_eq!(AppError(PortalError::ShareExpired).status(), StatusCode::GONE);
        assert_eq!(
            AppError(PortalError::ProposalLocked(ProposalStatus::Accepted)).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let resp = AppError::from(anyhow::anyhow!("password=hunter2")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

use thiserror::Error;

use crate::types::ProposalStatus;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("account locked until {0}")]
    AccountLocked(chrono::DateTime<chrono::Utc>),

    #[error("account is {0}")]
    AccountDisabled(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ProposalStatus,
        to: ProposalStatus,
    },

    #[error("proposal is {0} and can no longer be edited")]
    ProposalLocked(ProposalStatus),

    #[error("share link has expired")]
    ShareExpired,

    #[error("file too large: {size} bytes exceeds limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("content does not match declared type: {0}")]
    ContentMismatch(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("export format not available: {0}")]
    ExportUnavailable(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PortalError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidCredentials | Self::InvalidToken(_) | Self::Unauthenticated => 401,
            Self::AccountLocked(_) => 423,
            Self::AccountDisabled(_) | Self::PermissionDenied(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) | Self::InvalidTransition { .. } | Self::ProposalLocked(_) => 409,
            Self::ShareExpired => 410,
            Self::FileTooLarge { .. } => 413,
            Self::UnsupportedType(_) => 415,
            Self::ContentMismatch(_) => 422,
            Self::Validation(_) => 400,
            Self::ExportUnavailable(_) => 501,
            Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code carried in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::InvalidToken(_) => "invalid_token",
            Self::Unauthenticated => "unauthenticated",
            Self::AccountLocked(_) => "account_locked",
            Self::AccountDisabled(_) => "account_disabled",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ProposalLocked(_) => "proposal_locked",
            Self::ShareExpired => "share_expired",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::UnsupportedType(_) => "unsupported_type",
            Self::ContentMismatch(_) => "content_mismatch",
            Self::Validation(_) => "validation_error",
            Self::ExportUnavailable(_) => "export_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} {id}"))
    }
}

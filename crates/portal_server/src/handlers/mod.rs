//! Route handlers, one module per API area. Each handler resolves the
//! caller from the JWT extension and delegates to [`portal_core::Portal`].

pub mod admin;
pub mod auth;
pub mod client_portal;
pub mod dashboard;
pub mod files;
pub mod health;
pub mod proposals;
pub mod shared;
pub mod team_dashboard;
pub mod users;

use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};

/// Binary download with an attachment disposition.
pub(crate) fn attachment(content_type: &str, filename: &str, bytes: Vec<u8>) -> Response {
    let safe_name: String = filename
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() || !c.is_ascii() { '_' } else { c })
        .collect();
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{safe_name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    ([(CONTENT_TYPE, content_type), (CONTENT_DISPOSITION, disposition)], bytes).into_response()
}

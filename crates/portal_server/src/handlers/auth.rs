//! /api/v1/auth: registration, login, token refresh and logout.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::{Extension, Json};
use portal_core::principal::Principal;
use portal_core::service::{AuthSession, NewUser};
use portal_core::types::UserView;
use portal_core::Portal;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::extract::ApiJson;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

pub async fn register(
    Extension(portal): Extension<Arc<Portal>>,
    ApiJson(req): ApiJson<NewUser>,
) -> Result<(StatusCode, Json<AuthSession>), AppError> {
    let session = portal.register(req).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn login(
    Extension(portal): Extension<Arc<Portal>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<AuthSession>, AppError> {
    Ok(Json(portal.login(&req.email, &req.password).await?))
}

pub async fn refresh(
    Extension(portal): Extension<Arc<Portal>>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<Json<AuthSession>, AppError> {
    Ok(Json(portal.refresh(&req.refresh_token).await?))
}

pub async fn logout(
    Extension(portal): Extension<Arc<Portal>>,
    ApiJson(req): ApiJson<RefreshRequest>,
) -> Result<Json<Value>, AppError> {
    portal.logout(&req.refresh_token).await?;
    Ok(Json(json!({ "message": "logged out" })))
}

pub async fn logout_all(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, AppError> {
    let revoked = portal.logout_all(&principal).await?;
    Ok(Json(json!({ "revoked_sessions": revoked })))
}

pub async fn me(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<UserView>, AppError> {
    Ok(Json(portal.current_user(&principal).await?))
}

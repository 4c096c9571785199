//! /api/v1/admin: admin-only user management and maintenance.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::{Extension, Json};
use portal_core::principal::Principal;
use portal_core::service::{NewUser, UserStats};
use portal_core::types::{Role, UserStatus, UserView};
use portal_core::Portal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::{ApiJson, ApiPath};

#[derive(Debug, Deserialize)]
pub struct RoleChange {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: UserStatus,
}

pub async fn create_user(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<NewUser>,
) -> Result<(StatusCode, Json<UserView>), AppError> {
    let user = portal.create_user(&principal, req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn set_role(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<RoleChange>,
) -> Result<Json<UserView>, AppError> {
    Ok(Json(portal.set_user_role(&principal, id, req.role).await?))
}

pub async fn set_status(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<StatusChange>,
) -> Result<Json<UserView>, AppError> {
    Ok(Json(portal.set_user_status(&principal, id, req.status).await?))
}

pub async fn force_logout(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Value>, AppError> {
    let revoked = portal.force_logout(&principal, id).await?;
    Ok(Json(json!({ "user_id": id, "revoked_sessions": revoked })))
}

pub async fn user_stats(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<UserStats>, AppError> {
    Ok(Json(portal.user_stats(&principal).await?))
}

pub async fn cleanup_tokens(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Value>, AppError> {
    let removed = portal.purge_refresh_tokens(&principal).await?;
    Ok(Json(json!({ "removed_tokens": removed })))
}

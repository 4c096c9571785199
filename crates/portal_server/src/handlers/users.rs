//! /api/v1/users: own profile and staff user management.

use std::sync::Arc;

use axum::{Extension, Json};
use portal_core::principal::Principal;
use portal_core::service::{ProfileUpdate, UserQuery};
use portal_core::types::{Paged, UserView};
use portal_core::Portal;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn get_me(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<UserView>, AppError> {
    Ok(Json(portal.current_user(&principal).await?))
}

pub async fn update_me(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> Result<Json<UserView>, AppError> {
    Ok(Json(portal.update_profile(&principal, update).await?))
}

pub async fn change_password(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> Result<Json<Value>, AppError> {
    portal
        .change_password(&principal, &req.current_password, &req.new_password)
        .await?;
    Ok(Json(json!({ "message": "password changed; please log in again" })))
}

pub async fn list_users(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiQuery(query): ApiQuery<UserQuery>,
) -> Result<Json<Paged<UserView>>, AppError> {
    Ok(Json(portal.list_users(&principal, query).await?))
}

pub async fn get_user(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<UserView>, AppError> {
    Ok(Json(portal.get_user(&principal, id).await?))
}

pub async fn update_user(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> Result<Json<UserView>, AppError> {
    Ok(Json(portal.update_user(&principal, id, update).await?))
}

/// Soft delete: the account is deactivated, never removed.
pub async fn delete_user(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<UserView>, AppError> {
    Ok(Json(portal.deactivate_user(&principal, id).await?))
}

//! /api/v1/client-portal: the client's view of their own projects.

use std::sync::Arc;

use axum::response::Response;
use axum::{Extension, Json};
use portal_core::dashboard::ClientDashboard;
use portal_core::principal::Principal;
use portal_core::service::{ProjectStatus, ProposalQuery};
use portal_core::types::{Paged, ProposalSummary};
use portal_core::Portal;
use uuid::Uuid;

use super::attachment;
use super::proposals::{parse_format, ExportQuery};
use crate::error::AppError;
use crate::extract::{ApiPath, ApiQuery};

pub async fn proposals(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiQuery(query): ApiQuery<ProposalQuery>,
) -> Result<Json<Paged<ProposalSummary>>, AppError> {
    Ok(Json(portal.client_proposals(&principal, query).await?))
}

pub async fn project_status(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<ProjectStatus>, AppError> {
    Ok(Json(portal.client_project_status(&principal, id).await?))
}

pub async fn export(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath((id, format)): ApiPath<(Uuid, String)>,
    ApiQuery(query): ApiQuery<ExportQuery>,
) -> Result<Response, AppError> {
    let format = parse_format(&format)?;
    let rendered = portal
        .client_export(&principal, id, format, query.include_metadata.unwrap_or(false))
        .await?;
    Ok(attachment(rendered.content_type, &rendered.filename, rendered.bytes))
}

pub async fn dashboard(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ClientDashboard>, AppError> {
    Ok(Json(portal.client_dashboard(&principal).await?))
}

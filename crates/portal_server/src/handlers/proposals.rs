//! /api/v1/proposals: authoring, status transitions, sharing, export
//! and delivery tracking.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Response;
use axum::{Extension, Json};
use portal_core::export::ExportFormat;
use portal_core::principal::Principal;
use portal_core::service::{
    DuplicateRequest, GenerateRequest, MilestoneUpdate, NewProposal, ProjectStatus,
    ProposalHistory, ProposalQuery, ProposalUpdate, ShareRequest, TransitionOutcome,
};
use portal_core::types::{
    FileRecord, Paged, Proposal, ProposalShare, ProposalStatus, ProposalSummary, ProposalVersion,
};
use portal_core::Portal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attachment;
use crate::error::AppError;
use crate::extract::{ApiJson, ApiPath, ApiQuery, OptionalJson};
use crate::router::PublicLinks;

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: ProposalStatus,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdvanceRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub include_metadata: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    #[serde(flatten)]
    pub share: ProposalShare,
    pub share_url: String,
}

pub(crate) fn parse_format(raw: &str) -> Result<ExportFormat, AppError> {
    ExportFormat::from_str(raw)
        .ok_or_else(|| AppError::bad_request(format!("unsupported export format {raw}")))
}

pub async fn create_proposal(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<NewProposal>,
) -> Result<(StatusCode, Json<Proposal>), AppError> {
    let proposal = portal.create_proposal(&principal, req).await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}

pub async fn list_proposals(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiQuery(query): ApiQuery<ProposalQuery>,
) -> Result<Json<Paged<ProposalSummary>>, AppError> {
    Ok(Json(portal.list_proposals(&principal, query).await?))
}

pub async fn get_proposal(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Proposal>, AppError> {
    Ok(Json(portal.get_proposal(&principal, id).await?))
}

pub async fn update_proposal(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(update): ApiJson<ProposalUpdate>,
) -> Result<Json<Proposal>, AppError> {
    Ok(Json(portal.update_proposal(&principal, id, update).await?))
}

pub async fn delete_proposal(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<StatusCode, AppError> {
    portal.delete_proposal(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn transition(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<TransitionRequest>,
) -> Result<Json<TransitionOutcome>, AppError> {
    let outcome = portal
        .transition_proposal(&principal, id, req.status, req.note)
        .await?;
    Ok(Json(outcome))
}

pub async fn list_versions(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Vec<ProposalVersion>>, AppError> {
    Ok(Json(portal.list_versions(&principal, id).await?))
}

pub async fn history(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<ProposalHistory>, AppError> {
    Ok(Json(portal.proposal_history(&principal, id).await?))
}

pub async fn share(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    Extension(links): Extension<PublicLinks>,
    ApiPath(id): ApiPath<Uuid>,
    OptionalJson(body): OptionalJson<ShareRequest>,
) -> Result<(StatusCode, Json<ShareResponse>), AppError> {
    let req = body.unwrap_or_default();
    let share = portal.share_proposal(&principal, id, req).await?;
    let share_url = links.shared_proposal_url(&share.share_token);
    Ok((StatusCode::CREATED, Json(ShareResponse { share, share_url })))
}

pub async fn revoke_share(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath((id, share_id)): ApiPath<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    portal.revoke_share(&principal, id, share_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn export(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath((id, format)): ApiPath<(Uuid, String)>,
    ApiQuery(query): ApiQuery<ExportQuery>,
) -> Result<Response, AppError> {
    let format = parse_format(&format)?;
    let rendered = portal
        .export_proposal(&principal, id, format, query.include_metadata.unwrap_or(false))
        .await?;
    Ok(attachment(rendered.content_type, &rendered.filename, rendered.bytes))
}

pub async fn duplicate(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
    OptionalJson(body): OptionalJson<DuplicateRequest>,
) -> Result<(StatusCode, Json<Proposal>), AppError> {
    let req = body.unwrap_or_default();
    let copy = portal.duplicate_proposal(&principal, id, req).await?;
    Ok((StatusCode::CREATED, Json(copy)))
}

pub async fn generate(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
    OptionalJson(body): OptionalJson<GenerateRequest>,
) -> Result<Json<Proposal>, AppError> {
    let req = body.unwrap_or_default();
    Ok(Json(portal.generate_content(&principal, id, req).await?))
}

pub async fn project_status(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<ProjectStatus>, AppError> {
    Ok(Json(portal.project_status(&principal, id).await?))
}

pub async fn advance_phase(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
    OptionalJson(body): OptionalJson<AdvanceRequest>,
) -> Result<Json<ProjectStatus>, AppError> {
    let notes = body.and_then(|r| r.notes);
    Ok(Json(portal.advance_phase(&principal, id, notes).await?))
}

pub async fn update_milestone(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(update): ApiJson<MilestoneUpdate>,
) -> Result<Json<ProjectStatus>, AppError> {
    Ok(Json(portal.update_milestone(&principal, id, update).await?))
}

pub async fn proposal_files(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Vec<FileRecord>>, AppError> {
    Ok(Json(portal.list_proposal_files(&principal, id).await?))
}

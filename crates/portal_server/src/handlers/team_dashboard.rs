//! /api/v1/team-dashboard: staff views and bulk operations.

use std::sync::Arc;

use axum::{Extension, Json};
use portal_core::principal::Principal;
use portal_core::service::{
    AnalyticsReport, BulkOutcome, BulkUpdateRequest, ProposalQuery, TeamDashboardData,
    TeamOverview,
};
use portal_core::types::{Paged, Proposal, ProposalSummary};
use portal_core::Portal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::{ApiJson, ApiQuery};

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub proposal_id: Uuid,
    pub user_id: Uuid,
}

pub async fn overview(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<TeamOverview>, AppError> {
    Ok(Json(portal.team_overview(&principal).await?))
}

pub async fn proposals(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiQuery(query): ApiQuery<ProposalQuery>,
) -> Result<Json<Paged<ProposalSummary>>, AppError> {
    Ok(Json(portal.team_proposals(&principal, query).await?))
}

pub async fn analytics(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<AnalyticsReport>, AppError> {
    Ok(Json(portal.team_analytics(&principal).await?))
}

pub async fn assign_proposal(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<AssignRequest>,
) -> Result<Json<Proposal>, AppError> {
    let proposal = portal
        .assign_proposal(&principal, req.proposal_id, req.user_id)
        .await?;
    Ok(Json(proposal))
}

/// Per-item results; one failing proposal does not abort the rest.
pub async fn bulk_update(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiJson(req): ApiJson<BulkUpdateRequest>,
) -> Result<Json<BulkOutcome>, AppError> {
    Ok(Json(portal.bulk_update(&principal, req).await?))
}

pub async fn dashboard_data(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<TeamDashboardData>, AppError> {
    Ok(Json(portal.team_dashboard_data(&principal).await?))
}

//! Dashboards for staff and clients. Every call recomputes from the store.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::{Portal, ProposalQuery, Result};
use crate::dashboard::{
    member_load, monthly_activity, ClientDashboard, DashboardSummary, MonthBucket, TeamMemberLoad,
};
use crate::export::{ExportFormat, RenderedExport};
use crate::principal::Principal;
use crate::types::*;

const RECENT_ACTIVITY_LIMIT: i64 = 10;
const ANALYTICS_MONTHS: u32 = 6;

#[derive(Debug, Clone, Serialize)]
pub struct TeamOverview {
    pub summary: DashboardSummary,
    /// Proposals assigned to the caller that are still open.
    pub my_open_assignments: usize,
    /// Newest first.
    pub recent_activity: Vec<AuditLogEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsReport {
    pub summary: DashboardSummary,
    pub monthly: Vec<MonthBucket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamDashboardData {
    pub summary: DashboardSummary,
    pub team: Vec<TeamMemberLoad>,
    /// Proposals waiting for review, oldest first.
    pub pending_review: Vec<ProposalSummary>,
}

impl Portal {
    /// Metrics over whatever the caller may see.
    pub async fn dashboard_summary(&self, principal: &Principal) -> Result<DashboardSummary> {
        let proposals = self.visible_proposals(principal).await?;
        Ok(DashboardSummary::compute(&proposals, Utc::now()))
    }

    pub async fn team_overview(&self, principal: &Principal) -> Result<TeamOverview> {
        principal.require_staff()?;
        let proposals = self.visible_proposals(principal).await?;
        let my_open_assignments = proposals
            .iter()
            .filter(|p| p.assigned_to == Some(principal.user_id))
            .filter(|p| !matches!(p.status, ProposalStatus::Accepted | ProposalStatus::Rejected))
            .count();
        Ok(TeamOverview {
            summary: DashboardSummary::compute(&proposals, Utc::now()),
            my_open_assignments,
            recent_activity: self.stores.audit.list_recent(RECENT_ACTIVITY_LIMIT).await?,
        })
    }

    pub async fn team_proposals(
        &self,
        principal: &Principal,
        query: ProposalQuery,
    ) -> Result<Paged<ProposalSummary>> {
        principal.require_staff()?;
        self.paged_proposals(query.into()).await
    }

    pub async fn team_analytics(&self, principal: &Principal) -> Result<AnalyticsReport> {
        principal.require_staff()?;
        let proposals = self.visible_proposals(principal).await?;
        let now = Utc::now();
        Ok(AnalyticsReport {
            summary: DashboardSummary::compute(&proposals, now),
            monthly: monthly_activity(&proposals, now, ANALYTICS_MONTHS),
        })
    }

    pub async fn team_dashboard_data(&self, principal: &Principal) -> Result<TeamDashboardData> {
        principal.require_staff()?;
        let proposals = self.visible_proposals(principal).await?;
        let team = self
            .list_staff(principal)
            .await?
            .into_iter()
            .map(|u| member_load(u.id, u.full_name, u.email, &proposals))
            .collect();
        let mut pending: Vec<&Proposal> = proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::InReview)
            .collect();
        pending.sort_by_key(|p| p.updated_at);
        Ok(TeamDashboardData {
            summary: DashboardSummary::compute(&proposals, Utc::now()),
            team,
            pending_review: pending.into_iter().map(ProposalSummary::from).collect(),
        })
    }

    // ── Client portal ─────────────────────────────────────────

    pub async fn client_dashboard(&self, principal: &Principal) -> Result<ClientDashboard> {
        principal.require_role(&[Role::Client])?;
        let proposals = self.visible_proposals(principal).await?;
        Ok(ClientDashboard::compute(&proposals))
    }

    pub async fn client_proposals(
        &self,
        principal: &Principal,
        query: ProposalQuery,
    ) -> Result<Paged<ProposalSummary>> {
        principal.require_role(&[Role::Client])?;
        self.list_proposals(principal, query).await
    }

    pub async fn client_project_status(
        &self,
        principal: &Principal,
        id: Uuid,
    ) -> Result<super::ProjectStatus> {
        principal.require_role(&[Role::Client])?;
        self.project_status(principal, id).await
    }

    pub async fn client_export(
        &self,
        principal: &Principal,
        id: Uuid,
        format: ExportFormat,
        include_metadata: bool,
    ) -> Result<RenderedExport> {
        principal.require_role(&[Role::Client])?;
        self.export_proposal(principal, id, format, include_metadata)
            .await
    }
}

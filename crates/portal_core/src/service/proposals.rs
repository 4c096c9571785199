//! Proposal lifecycle: authoring, versioning, status transitions, sharing,
//! export and delivery tracking.

use std::slice;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{Portal, Result};
use crate::access;
use crate::error::PortalError;
use crate::export::{
    format_date, title_case, CustomSection, ExportFormat, GeneratedContentContext, RenderedExport,
    COMPANY_NAME,
};
use crate::lifecycle::{self, AppliedTransition};
use crate::ports::ProposalWrite;
use crate::principal::Principal;
use crate::tokens::generate_opaque_token;
use crate::types::*;

const MAX_TITLE_LEN: usize = 255;
const MAX_MILESTONE_NAME_LEN: usize = 100;
const MAX_SHARE_DAYS: i64 = 365;
const MAX_BULK_ITEMS: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct NewProposal {
    pub project_name: String,
    pub client_name: String,
    #[serde(default)]
    pub phase: Option<ProjectPhase>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub requirements: Option<Value>,
    #[serde(default)]
    pub assigned_to: Option<Uuid>,
    #[serde(default)]
    pub client_user_id: Option<Uuid>,
}

/// Partial update. `status` goes through the status machine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProposalUpdate {
    pub project_name: Option<String>,
    pub client_name: Option<String>,
    pub phase: Option<ProjectPhase>,
    pub content: Option<String>,
    pub requirements: Option<Value>,
    pub client_user_id: Option<Uuid>,
    pub status: Option<ProposalStatus>,
    /// Version note when content changes, transition note otherwise.
    pub change_summary: Option<String>,
}

impl ProposalUpdate {
    fn edits_fields(&self) -> bool {
        self.project_name.is_some()
            || self.client_name.is_some()
            || self.phase.is_some()
            || self.content.is_some()
            || self.requirements.is_some()
            || self.client_user_id.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProposalQuery {
    pub status: Option<ProposalStatus>,
    pub phase: Option<ProjectPhase>,
    pub search: Option<String>,
    pub created_by: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<ProposalQuery> for ProposalFilter {
    fn from(q: ProposalQuery) -> Self {
        ProposalFilter {
            statuses: q.status.into_iter().collect(),
            phase: q.phase,
            search: q.search,
            created_by: q.created_by,
            assigned_to: q.assigned_to,
            client_scope: None,
            limit: q.limit,
            offset: q.offset,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    #[serde(flatten)]
    pub transition: AppliedTransition,
    pub proposal: Proposal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProposalHistory {
    pub proposal: ProposalSummary,
    pub versions: Vec<ProposalVersion>,
    pub shares: Vec<ProposalShare>,
    /// Oldest first.
    pub audit: Vec<AuditLogEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShareRequest {
    pub recipient_user_id: Option<Uuid>,
    /// No expiry when absent.
    pub expires_in_days: Option<i64>,
}

/// What an anonymous share-link holder sees.
#[derive(Debug, Clone, Serialize)]
pub struct SharedProposal {
    pub id: Uuid,
    pub project_name: String,
    pub client_name: String,
    pub phase: ProjectPhase,
    pub status: ProposalStatus,
    pub content: String,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DuplicateRequest {
    pub project_name: Option<String>,
    pub client_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest {
    /// Falls back to the proposal's stored requirements.
    pub requirements: Option<Value>,
    #[serde(default)]
    pub custom_sections: Vec<CustomSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MilestoneUpdate {
    pub name: String,
    pub status: MilestoneStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub proposal: ProposalSummary,
    pub tracker: ProjectTracker,
    pub progress_percent: u8,
    pub next_phase: Option<ProjectPhase>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum BulkOperation {
    StatusUpdate { status: ProposalStatus },
    Assign { user_id: Uuid },
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkUpdateRequest {
    pub proposal_ids: Vec<Uuid>,
    #[serde(flatten)]
    pub operation: BulkOperation,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    pub proposal_id: Uuid,
    pub error: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkOutcome {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<BulkFailure>,
}

fn validate_title(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() || value.chars().count() > MAX_TITLE_LEN {
        return Err(PortalError::Validation(format!(
            "{field} must be between 1 and {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(value.to_string())
}

fn validate_requirements(requirements: &Option<Value>) -> Result<()> {
    match requirements {
        None | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(PortalError::Validation(
            "requirements must be a JSON object".into(),
        )),
    }
}

fn required_text(requirements: &Value, key: &str) -> Result<String> {
    match requirements.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(PortalError::Validation(format!(
            "requirements.{key} is required"
        ))),
    }
}

/// `deliverables` may be a list of strings or one newline-separated string.
fn deliverables(requirements: &Value) -> Result<Vec<String>> {
    let items: Vec<String> = match requirements.get("deliverables") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Some(Value::String(s)) => s
            .lines()
            .map(|l| l.trim().trim_start_matches(['-', '*']).trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    };
    if items.is_empty() {
        return Err(PortalError::Validation(
            "requirements.deliverables is required".into(),
        ));
    }
    Ok(items)
}

fn generation_context(
    proposal: &Proposal,
    requirements: &Value,
    custom_sections: Vec<CustomSection>,
    now: DateTime<Utc>,
) -> Result<GeneratedContentContext> {
    Ok(GeneratedContentContext {
        project_name: proposal.project_name.clone(),
        client_name: proposal.client_name.clone(),
        phase: title_case(proposal.phase.as_str()),
        date: format_date(now),
        scope: required_text(requirements, "scope")?,
        timeline: required_text(requirements, "timeline")?,
        deliverables: deliverables(requirements)?,
        budget_range: requirements
            .get("budget_range")
            .and_then(Value::as_str)
            .map(String::from),
        custom_sections: custom_sections
            .into_iter()
            .filter(|s| !s.title.trim().is_empty())
            .collect(),
        company_name: COMPANY_NAME.to_string(),
    })
}

fn proposal_audit(actor: &Principal, action: &str, id: Uuid, detail: Value) -> AuditLogEntry {
    AuditLogEntry::proposal(actor.user_id, action, id, detail)
}

impl Portal {
    /// Assignees must be active staff.
    async fn ensure_assignable(&self, id: Uuid) -> Result<User> {
        let user = self
            .stores
            .users
            .get_user(id)
            .await?
            .ok_or_else(|| PortalError::Validation(format!("assignee {id} does not exist")))?;
        if !user.role.is_staff() || user.status != UserStatus::Active {
            return Err(PortalError::Validation(format!(
                "assignee {id} is not an active staff member"
            )));
        }
        Ok(user)
    }

    async fn ensure_client(&self, id: Uuid) -> Result<User> {
        let user = self
            .stores
            .users
            .get_user(id)
            .await?
            .ok_or_else(|| PortalError::Validation(format!("user {id} does not exist")))?;
        if user.role != Role::Client {
            return Err(PortalError::Validation(format!("user {id} is not a client")));
        }
        Ok(user)
    }

    async fn tracker_for(&self, proposal: &Proposal) -> Result<ProjectTracker> {
        Ok(self
            .stores
            .proposals
            .get_tracker(proposal.id)
            .await?
            .unwrap_or_else(|| ProjectTracker::new(proposal.id, proposal.phase, proposal.updated_at)))
    }

    async fn next_version(
        &self,
        principal: &Principal,
        proposal: &Proposal,
        summary: String,
        now: DateTime<Utc>,
    ) -> Result<ProposalVersion> {
        let latest = self
            .stores
            .proposals
            .latest_version_number(proposal.id)
            .await?;
        Ok(ProposalVersion {
            id: Uuid::new_v4(),
            proposal_id: proposal.id,
            version_number: latest + 1,
            content: proposal.content.clone(),
            change_summary: summary,
            created_by: principal.user_id,
            created_at: now,
        })
    }

    /// Insert a fresh draft with version 1 and a tracker.
    async fn insert_draft(
        &self,
        principal: &Principal,
        proposal: Proposal,
        change_summary: String,
        audit: AuditLogEntry,
    ) -> Result<Proposal> {
        let version = ProposalVersion {
            id: Uuid::new_v4(),
            proposal_id: proposal.id,
            version_number: 1,
            content: proposal.content.clone(),
            change_summary,
            created_by: principal.user_id,
            created_at: proposal.created_at,
        };
        let tracker = ProjectTracker::new(proposal.id, proposal.phase, proposal.created_at);
        self.stores
            .proposals
            .save_proposal(ProposalWrite {
                proposal: &proposal,
                expected_status: None,
                version: Some(&version),
                tracker: Some(&tracker),
                audit: slice::from_ref(&audit),
            })
            .await?;
        Ok(proposal)
    }

    pub async fn create_proposal(&self, principal: &Principal, req: NewProposal) -> Result<Proposal> {
        principal.require_staff()?;
        let project_name = validate_title("project_name", &req.project_name)?;
        let client_name = validate_title("client_name", &req.client_name)?;
        validate_requirements(&req.requirements)?;
        if let Some(id) = req.assigned_to {
            self.ensure_assignable(id).await?;
        }
        if let Some(id) = req.client_user_id {
            self.ensure_client(id).await?;
        }

        let now = Utc::now();
        let proposal = Proposal {
            id: Uuid::new_v4(),
            project_name,
            client_name,
            phase: req.phase.unwrap_or(ProjectPhase::Exploratory),
            status: ProposalStatus::Draft,
            content: req.content.unwrap_or_default(),
            requirements: req.requirements,
            created_by: principal.user_id,
            assigned_to: req.assigned_to,
            client_user_id: req.client_user_id,
            created_at: now,
            updated_at: now,
        };
        let audit = proposal_audit(
            principal,
            "proposal.created",
            proposal.id,
            json!({ "project_name": proposal.project_name, "client_name": proposal.client_name }),
        );
        let proposal = self
            .insert_draft(principal, proposal, "Initial version".into(), audit)
            .await?;
        tracing::info!(proposal_id = %proposal.id, by = %principal.user_id, "proposal created");
        Ok(proposal)
    }

    pub async fn get_proposal(&self, principal: &Principal, id: Uuid) -> Result<Proposal> {
        Ok(self.viewable_proposal(principal, id).await?.0)
    }

    /// Clients only ever see client-visible proposals assigned or shared to them.
    pub async fn list_proposals(
        &self,
        principal: &Principal,
        query: ProposalQuery,
    ) -> Result<Paged<ProposalSummary>> {
        let filter = self.scope_filter(principal, query.into()).await?;
        self.paged_proposals(filter).await
    }

    pub async fn update_proposal(
        &self,
        principal: &Principal,
        id: Uuid,
        update: ProposalUpdate,
    ) -> Result<Proposal> {
        if !update.edits_fields() {
            if let Some(to) = update.status {
                let current = self.load_proposal(id).await?;
                if current.status != to {
                    let outcome = self
                        .transition_proposal(principal, id, to, update.change_summary)
                        .await?;
                    return Ok(outcome.proposal);
                }
            }
            return self.editable_proposal(principal, id).await;
        }

        let mut proposal = self.editable_proposal(principal, id).await?;
        lifecycle::ensure_editable(&proposal)?;
        validate_requirements(&update.requirements)?;
        let read_status = proposal.status;

        let now = Utc::now();
        let mut changes: Vec<&str> = Vec::new();
        if let Some(v) = update.project_name {
            let v = validate_title("project_name", &v)?;
            if v != proposal.project_name {
                proposal.project_name = v;
                changes.push("project_name");
            }
        }
        if let Some(v) = update.client_name {
            let v = validate_title("client_name", &v)?;
            if v != proposal.client_name {
                proposal.client_name = v;
                changes.push("client_name");
            }
        }
        if let Some(client_id) = update.client_user_id.filter(|c| proposal.client_user_id != Some(*c)) {
            self.ensure_client(client_id).await?;
            proposal.client_user_id = Some(client_id);
            changes.push("client_user_id");
        }
        if let Some(v) = update.requirements.filter(|r| proposal.requirements.as_ref() != Some(r)) {
            proposal.requirements = Some(v);
            changes.push("requirements");
        }
        let phase_changed = update.phase.is_some_and(|p| p != proposal.phase);
        if let Some(phase) = update.phase.filter(|_| phase_changed) {
            proposal.phase = phase;
            changes.push("phase");
        }
        let content_changed = update.content.as_ref().is_some_and(|c| *c != proposal.content);
        if let Some(content) = update.content.filter(|_| content_changed) {
            proposal.content = content;
            changes.push("content");
        }
        let status_target = update.status.filter(|s| *s != proposal.status);
        if changes.is_empty() && status_target.is_none() {
            return Ok(proposal);
        }

        let mut audit = Vec::with_capacity(2);
        if !changes.is_empty() {
            proposal.updated_at = now;
            audit.push(proposal_audit(
                principal,
                "proposal.updated",
                id,
                json!({ "changes": changes }),
            ));
        }
        if let Some(to) = status_target {
            // Only editors reach this point, so no client grant is involved.
            let applied = lifecycle::apply_transition(principal, &mut proposal, to, false, now)?;
            audit.push(proposal_audit(
                principal,
                "proposal.status_changed",
                id,
                json!({ "from": applied.from, "to": applied.to, "note": update.change_summary }),
            ));
        }

        let version = if content_changed {
            let summary = update
                .change_summary
                .clone()
                .unwrap_or_else(|| "Content updated".into());
            Some(self.next_version(principal, &proposal, summary, now).await?)
        } else {
            None
        };
        let tracker = if phase_changed {
            let mut tracker = self.tracker_for(&proposal).await?;
            tracker.current_phase = proposal.phase;
            tracker.updated_at = now;
            Some(tracker)
        } else {
            None
        };

        self.stores
            .proposals
            .save_proposal(ProposalWrite {
                proposal: &proposal,
                expected_status: Some(read_status),
                version: version.as_ref(),
                tracker: tracker.as_ref(),
                audit: &audit,
            })
            .await?;
        tracing::info!(proposal_id = %id, ?changes, "proposal updated");
        Ok(proposal)
    }

    /// Move a proposal along one status edge. Clients need an assignment or
    /// an active share, and may only accept or reject a sent proposal.
    pub async fn transition_proposal(
        &self,
        principal: &Principal,
        id: Uuid,
        to: ProposalStatus,
        note: Option<String>,
    ) -> Result<TransitionOutcome> {
        let mut proposal = self.load_proposal(id).await?;
        let shared = self.shared_with(principal, id).await?;
        // A grant alone does not reveal statuses clients cannot see.
        if principal.role == Role::Client
            && !access::can_view_proposal(principal, &proposal, shared)
        {
            return Err(PortalError::PermissionDenied(
                "you do not have access to this proposal".into(),
            ));
        }
        let has_grant = access::client_has_grant(principal, &proposal, shared);

        let now = Utc::now();
        let transition = match lifecycle::apply_transition(principal, &mut proposal, to, has_grant, now) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(proposal_id = %id, from = %proposal.status, to = %to, error = %e, "transition refused");
                return Err(e);
            }
        };
        let audit = proposal_audit(
            principal,
            "proposal.status_changed",
            id,
            json!({ "from": transition.from, "to": transition.to, "note": note }),
        );
        self.stores
            .proposals
            .save_proposal(ProposalWrite {
                proposal: &proposal,
                expected_status: Some(transition.from),
                version: None,
                tracker: None,
                audit: slice::from_ref(&audit),
            })
            .await?;
        tracing::info!(proposal_id = %id, from = %transition.from, to = %transition.to, by = %principal.user_id, "proposal status changed");
        Ok(TransitionOutcome {
            transition,
            proposal,
        })
    }

    pub async fn delete_proposal(&self, principal: &Principal, id: Uuid) -> Result<()> {
        principal.require_admin()?;
        let proposal = self.load_proposal(id).await?;
        let audit = proposal_audit(
            principal,
            "proposal.deleted",
            id,
            json!({ "project_name": proposal.project_name, "client_name": proposal.client_name }),
        );
        if !self.stores.proposals.delete_proposal(id, &audit).await? {
            return Err(PortalError::not_found("proposal", id));
        }
        tracing::info!(proposal_id = %id, by = %principal.user_id, "proposal deleted");
        Ok(())
    }

    pub async fn list_versions(&self, principal: &Principal, id: Uuid) -> Result<Vec<ProposalVersion>> {
        principal.require_staff()?;
        self.load_proposal(id).await?;
        self.stores.proposals.list_versions(id).await
    }

    pub async fn proposal_history(&self, principal: &Principal, id: Uuid) -> Result<ProposalHistory> {
        principal.require_staff()?;
        let proposal = self.load_proposal(id).await?;
        Ok(ProposalHistory {
            proposal: ProposalSummary::from(&proposal),
            versions: self.stores.proposals.list_versions(id).await?,
            shares: self.stores.shares.list_shares(id).await?,
            audit: self
                .stores
                .audit
                .list_for_target(AuditTarget::Proposal, id)
                .await?,
        })
    }

    pub async fn share_proposal(
        &self,
        principal: &Principal,
        id: Uuid,
        req: ShareRequest,
    ) -> Result<ProposalShare> {
        principal.require_staff()?;
        self.load_proposal(id).await?;
        if let Some(recipient) = req.recipient_user_id {
            self.ensure_client(recipient).await?;
        }
        if let Some(days) = req.expires_in_days {
            if !(1..=MAX_SHARE_DAYS).contains(&days) {
                return Err(PortalError::Validation(format!(
                    "expires_in_days must be between 1 and {MAX_SHARE_DAYS}"
                )));
            }
        }

        let now = Utc::now();
        let share = ProposalShare {
            id: Uuid::new_v4(),
            proposal_id: id,
            share_token: generate_opaque_token(),
            recipient_user_id: req.recipient_user_id,
            created_by: principal.user_id,
            expires_at: req.expires_in_days.map(|d| now + Duration::days(d)),
            revoked_at: None,
            access_count: 0,
            last_accessed_at: None,
            created_at: now,
        };
        let audit = proposal_audit(
            principal,
            "proposal.shared",
            id,
            json!({
                "share_id": share.id,
                "recipient_user_id": share.recipient_user_id,
                "expires_at": share.expires_at,
            }),
        );
        self.stores.shares.insert_share(&share, &audit).await?;
        tracing::info!(proposal_id = %id, share_id = %share.id, "proposal shared");
        Ok(share)
    }

    /// Revoking twice is a no-op.
    pub async fn revoke_share(&self, principal: &Principal, id: Uuid, share_id: Uuid) -> Result<()> {
        principal.require_staff()?;
        let share = self
            .stores
            .shares
            .get_share(share_id)
            .await?
            .filter(|s| s.proposal_id == id)
            .ok_or_else(|| PortalError::not_found("share", share_id))?;
        if share.revoked_at.is_some() {
            return Ok(());
        }
        let audit = proposal_audit(
            principal,
            "proposal.share_revoked",
            id,
            json!({ "share_id": share_id }),
        );
        self.stores
            .shares
            .revoke_share(share_id, Utc::now(), &audit)
            .await?;
        tracing::info!(proposal_id = %id, share_id = %share_id, "share revoked");
        Ok(())
    }

    /// Anonymous read through a share token.
    pub async fn shared_proposal(&self, token: &str) -> Result<SharedProposal> {
        let share = self
            .stores
            .shares
            .find_share_by_token(token)
            .await?
            .filter(|s| s.revoked_at.is_none())
            .ok_or_else(|| PortalError::NotFound("share link".into()))?;
        let now = Utc::now();
        if share.is_expired(now) {
            return Err(PortalError::ShareExpired);
        }
        let proposal = self.load_proposal(share.proposal_id).await?;
        self.stores.shares.record_share_access(share.id, now).await?;
        tracing::debug!(share_id = %share.id, proposal_id = %proposal.id, "shared proposal accessed");
        Ok(SharedProposal {
            id: proposal.id,
            project_name: proposal.project_name,
            client_name: proposal.client_name,
            phase: proposal.phase,
            status: proposal.status,
            content: proposal.content,
            updated_at: proposal.updated_at,
            expires_at: share.expires_at,
        })
    }

    pub async fn export_proposal(
        &self,
        principal: &Principal,
        id: Uuid,
        format: ExportFormat,
        include_metadata: bool,
    ) -> Result<RenderedExport> {
        let (proposal, _) = self.viewable_proposal(principal, id).await?;
        let rendered = self.renderer.export(&proposal, format, include_metadata)?;
        self.stores
            .audit
            .append(&proposal_audit(
                principal,
                "proposal.exported",
                id,
                json!({ "format": format.as_str(), "bytes": rendered.bytes.len() }),
            ))
            .await?;
        Ok(rendered)
    }

    /// Copy into a new draft owned by the caller.
    pub async fn duplicate_proposal(
        &self,
        principal: &Principal,
        id: Uuid,
        req: DuplicateRequest,
    ) -> Result<Proposal> {
        principal.require_staff()?;
        let source = self.load_proposal(id).await?;
        let project_name = match req.project_name {
            Some(name) => validate_title("project_name", &name)?,
            None => validate_title("project_name", &format!("{} (Copy)", source.project_name))?,
        };
        let client_name = match req.client_name {
            Some(name) => validate_title("client_name", &name)?,
            None => source.client_name.clone(),
        };

        let now = Utc::now();
        let copy = Proposal {
            id: Uuid::new_v4(),
            project_name,
            client_name,
            phase: ProjectPhase::Exploratory,
            status: ProposalStatus::Draft,
            content: source.content.clone(),
            requirements: source.requirements.clone(),
            created_by: principal.user_id,
            assigned_to: source.assigned_to,
            client_user_id: source.client_user_id,
            created_at: now,
            updated_at: now,
        };
        let audit = proposal_audit(
            principal,
            "proposal.duplicated",
            copy.id,
            json!({ "source_id": source.id }),
        );
        let summary = format!("Duplicated from {}", source.project_name);
        let copy = self.insert_draft(principal, copy, summary, audit).await?;
        tracing::info!(proposal_id = %copy.id, source_id = %source.id, "proposal duplicated");
        Ok(copy)
    }

    /// Fill content from the built-in template and the proposal requirements.
    pub async fn generate_content(
        &self,
        principal: &Principal,
        id: Uuid,
        req: GenerateRequest,
    ) -> Result<Proposal> {
        let mut proposal = self.editable_proposal(principal, id).await?;
        lifecycle::ensure_editable(&proposal)?;
        validate_requirements(&req.requirements)?;
        let requirements = req
            .requirements
            .or_else(|| proposal.requirements.clone())
            .ok_or_else(|| PortalError::Validation("requirements are required".into()))?;

        let now = Utc::now();
        let ctx = generation_context(&proposal, &requirements, req.custom_sections, now)?;
        proposal.content = self.renderer.render_generated(&ctx)?;
        proposal.requirements = Some(requirements);
        proposal.updated_at = now;

        let version = self
            .next_version(principal, &proposal, "Generated from requirements".into(), now)
            .await?;
        let audit = proposal_audit(
            principal,
            "proposal.content_generated",
            id,
            json!({ "version": version.version_number, "custom_sections": ctx.custom_sections.len() }),
        );
        self.stores
            .proposals
            .save_proposal(ProposalWrite {
                proposal: &proposal,
                expected_status: Some(proposal.status),
                version: Some(&version),
                tracker: None,
                audit: slice::from_ref(&audit),
            })
            .await?;
        tracing::info!(proposal_id = %id, version = version.version_number, "proposal content generated");
        Ok(proposal)
    }

    pub async fn project_status(&self, principal: &Principal, id: Uuid) -> Result<ProjectStatus> {
        let (proposal, _) = self.viewable_proposal(principal, id).await?;
        let tracker = self.tracker_for(&proposal).await?;
        Ok(project_status(&proposal, tracker))
    }

    /// Complete the current phase and move to the next one. Completing
    /// deployment finishes the project.
    pub async fn advance_phase(
        &self,
        principal: &Principal,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<ProjectStatus> {
        principal.require_staff()?;
        let mut proposal = self.editable_proposal(principal, id).await?;
        if proposal.status == ProposalStatus::Rejected {
            return Err(PortalError::Validation(
                "a rejected proposal has no project to advance".into(),
            ));
        }
        let mut tracker = self.tracker_for(&proposal).await?;
        if tracker.is_completed(ProjectPhase::Deployment) {
            return Err(PortalError::Validation("project is already complete".into()));
        }

        let now = Utc::now();
        let from = proposal.phase;
        tracker.mark_completed(from);
        match from.next() {
            Some(next) => proposal.phase = next,
            None => tracker.actual_completion = Some(now),
        }
        tracker.current_phase = proposal.phase;
        tracker.updated_at = now;
        proposal.updated_at = now;

        let audit = proposal_audit(
            principal,
            "proposal.phase_advanced",
            id,
            json!({ "from": from, "to": proposal.phase, "notes": notes }),
        );
        self.stores
            .proposals
            .save_proposal(ProposalWrite {
                proposal: &proposal,
                expected_status: Some(proposal.status),
                version: None,
                tracker: Some(&tracker),
                audit: slice::from_ref(&audit),
            })
            .await?;
        tracing::info!(proposal_id = %id, from = %from, to = %proposal.phase, "project phase advanced");
        Ok(project_status(&proposal, tracker))
    }

    pub async fn update_milestone(
        &self,
        principal: &Principal,
        id: Uuid,
        update: MilestoneUpdate,
    ) -> Result<ProjectStatus> {
        principal.require_staff()?;
        let mut proposal = self.editable_proposal(principal, id).await?;
        let name = update.name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_MILESTONE_NAME_LEN {
            return Err(PortalError::Validation(format!(
                "milestone name must be between 1 and {MAX_MILESTONE_NAME_LEN} characters"
            )));
        }

        let now = Utc::now();
        let mut tracker = self.tracker_for(&proposal).await?;
        tracker.milestones.insert(
            name.clone(),
            Milestone {
                status: update.status,
                notes: update.notes,
                updated_at: now,
                updated_by: principal.user_id,
            },
        );
        tracker.current_phase = proposal.phase;
        tracker.updated_at = now;
        proposal.updated_at = now;

        let audit = proposal_audit(
            principal,
            "proposal.milestone_updated",
            id,
            json!({ "name": name, "status": update.status }),
        );
        self.stores
            .proposals
            .save_proposal(ProposalWrite {
                proposal: &proposal,
                expected_status: Some(proposal.status),
                version: None,
                tracker: Some(&tracker),
                audit: slice::from_ref(&audit),
            })
            .await?;
        Ok(project_status(&proposal, tracker))
    }

    pub async fn assign_proposal(&self, principal: &Principal, id: Uuid, assignee: Uuid) -> Result<Proposal> {
        principal.require_staff()?;
        let mut proposal = self.load_proposal(id).await?;
        self.ensure_assignable(assignee).await?;
        let previous = proposal.assigned_to;
        if previous == Some(assignee) {
            return Ok(proposal);
        }
        proposal.assigned_to = Some(assignee);
        proposal.updated_at = Utc::now();
        let audit = proposal_audit(
            principal,
            "proposal.assigned",
            id,
            json!({ "from": previous, "to": assignee }),
        );
        self.stores
            .proposals
            .save_proposal(ProposalWrite {
                proposal: &proposal,
                expected_status: Some(proposal.status),
                version: None,
                tracker: None,
                audit: slice::from_ref(&audit),
            })
            .await?;
        tracing::info!(proposal_id = %id, assignee = %assignee, "proposal assigned");
        Ok(proposal)
    }

    /// Apply one operation to many proposals, reporting per item.
    pub async fn bulk_update(&self, principal: &Principal, req: BulkUpdateRequest) -> Result<BulkOutcome> {
        principal.require_staff()?;
        if matches!(req.operation, BulkOperation::Delete) {
            principal.require_admin()?;
        }
        if req.proposal_ids.is_empty() || req.proposal_ids.len() > MAX_BULK_ITEMS {
            return Err(PortalError::Validation(format!(
                "proposal_ids must contain between 1 and {MAX_BULK_ITEMS} ids"
            )));
        }

        let mut outcome = BulkOutcome::default();
        for id in req.proposal_ids {
            let result = match &req.operation {
                BulkOperation::StatusUpdate { status } => self
                    .transition_proposal(principal, id, *status, Some("bulk update".into()))
                    .await
                    .map(|_| ()),
                BulkOperation::Assign { user_id } => {
                    self.assign_proposal(principal, id, *user_id).await.map(|_| ())
                }
                BulkOperation::Delete => self.delete_proposal(principal, id).await,
            };
            match result {
                Ok(()) => outcome.succeeded.push(id),
                Err(e) => outcome.failed.push(BulkFailure {
                    proposal_id: id,
                    error: e.code(),
                    message: e.to_string(),
                }),
            }
        }
        tracing::info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            "bulk update finished"
        );
        Ok(outcome)
    }
}

fn project_status(proposal: &Proposal, tracker: ProjectTracker) -> ProjectStatus {
    let next_phase = if tracker.is_completed(ProjectPhase::Deployment) {
        None
    } else {
        proposal.phase.next()
    };
    ProjectStatus {
        proposal: ProposalSummary::from(proposal),
        progress_percent: tracker.progress_percent(),
        tracker,
        next_phase,
    }
}

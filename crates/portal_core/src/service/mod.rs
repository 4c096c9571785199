//! The application service behind every HTTP route.
//!
//! Holds port traits via `Arc<dyn PortTrait>` so the same logic runs
//! against Postgres or [`MemoryStore`]. Every method takes the calling
//! [`Principal`] explicitly and enforces role and ownership rules itself.
//!
//! Methods are split by area: `auth`, `users`, `proposals`, `files` and
//! `dashboard`.

mod auth;
mod dashboard;
mod files;
mod proposals;
mod users;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::access;
use crate::error::PortalError;
use crate::export::DocumentRenderer;
use crate::memory::MemoryStore;
use crate::password::DEFAULT_BCRYPT_COST;
use crate::ports::{
    AuditStore, BlobStore, FileStore, ProposalStore, RefreshTokenStore, ShareStore, UserStore,
};
use crate::principal::Principal;
use crate::tokens::AccessTokenIssuer;
use crate::types::*;
use crate::upload::UploadPolicy;

pub use auth::{AuthSession, NewUser, TokenPair};
pub use dashboard::{AnalyticsReport, TeamDashboardData, TeamOverview};
pub use files::{FileDownload, FileQuery, UploadRequest};
pub use proposals::{
    BulkFailure, BulkOperation, BulkOutcome, BulkUpdateRequest, DuplicateRequest,
    GenerateRequest, MilestoneUpdate, NewProposal, ProjectStatus, ProposalHistory, ProposalQuery,
    ProposalUpdate, ShareRequest, SharedProposal, TransitionOutcome,
};
pub use users::{ProfileUpdate, RoleCount, StatusCount, UserQuery, UserStats};

pub type Result<T> = std::result::Result<T, PortalError>;

/// The storage ports a [`Portal`] runs against.
#[derive(Clone)]
pub struct PortalStores {
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn RefreshTokenStore>,
    pub proposals: Arc<dyn ProposalStore>,
    pub shares: Arc<dyn ShareStore>,
    pub files: Arc<dyn FileStore>,
    pub audit: Arc<dyn AuditStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl PortalStores {
    /// Every port backed by one in-process store.
    pub fn in_memory(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            users: store.clone(),
            tokens: store.clone(),
            proposals: store.clone(),
            shares: store.clone(),
            files: store.clone(),
            audit: store.clone(),
            blobs: store,
        }
    }

    /// Swap the blob port, e.g. for on-disk storage next to a memory store.
    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = blobs;
        self
    }
}

/// Credential and session rules.
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub refresh_ttl: Duration,
    pub max_failed_attempts: i32,
    pub lockout: Duration,
    pub bcrypt_cost: u32,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            refresh_ttl: Duration::days(7),
            max_failed_attempts: 5,
            lockout: Duration::minutes(15),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PortalSettings {
    pub auth: AuthPolicy,
    pub upload: UploadPolicy,
}

pub struct Portal {
    stores: PortalStores,
    settings: PortalSettings,
    issuer: Arc<dyn AccessTokenIssuer>,
    renderer: DocumentRenderer,
}

impl Portal {
    pub fn new(
        stores: PortalStores,
        settings: PortalSettings,
        issuer: Arc<dyn AccessTokenIssuer>,
    ) -> Result<Self> {
        Ok(Self {
            stores,
            settings,
            issuer,
            renderer: DocumentRenderer::new()?,
        })
    }

    /// Replace the document renderer, e.g. one with a DOCX exporter attached.
    pub fn with_renderer(mut self, renderer: DocumentRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn settings(&self) -> &PortalSettings {
        &self.settings
    }

    pub fn stores(&self) -> &PortalStores {
        &self.stores
    }

    // ── Shared lookups ────────────────────────────────────────

    async fn load_user(&self, id: Uuid) -> Result<User> {
        self.stores
            .users
            .get_user(id)
            .await?
            .ok_or_else(|| PortalError::not_found("user", id))
    }

    async fn load_proposal(&self, id: Uuid) -> Result<Proposal> {
        self.stores
            .proposals
            .get_proposal(id)
            .await?
            .ok_or_else(|| PortalError::not_found("proposal", id))
    }

    /// Proposal ids with an active share naming `user_id`.
    async fn shared_proposal_ids(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let shares = self.stores.shares.list_shares_for_recipient(user_id).await?;
        Ok(shares
            .into_iter()
            .filter(|s| s.grants(user_id, now))
            .map(|s| s.proposal_id)
            .collect())
    }

    /// Whether an active share grants `proposal_id` to a client caller.
    /// Always `false` for staff, who need no grant.
    async fn shared_with(&self, principal: &Principal, proposal_id: Uuid) -> Result<bool> {
        if principal.is_staff() {
            return Ok(false);
        }
        let ids = self.shared_proposal_ids(principal.user_id, Utc::now()).await?;
        Ok(ids.contains(&proposal_id))
    }

    /// Load a proposal the caller may read. Missing → `NotFound`,
    /// invisible → `PermissionDenied`.
    async fn viewable_proposal(&self, principal: &Principal, id: Uuid) -> Result<(Proposal, bool)> {
        let proposal = self.load_proposal(id).await?;
        let shared = self.shared_with(principal, id).await?;
        if !access::can_view_proposal(principal, &proposal, shared) {
            return Err(PortalError::PermissionDenied(
                "you do not have access to this proposal".into(),
            ));
        }
        Ok((proposal, shared))
    }

    /// Load a proposal the caller may edit.
    async fn editable_proposal(&self, principal: &Principal, id: Uuid) -> Result<Proposal> {
        let (proposal, _) = self.viewable_proposal(principal, id).await?;
        if !access::can_edit_proposal(principal, &proposal) {
            return Err(PortalError::PermissionDenied(
                "only the creator, the assignee or an admin may edit this proposal".into(),
            ));
        }
        Ok(proposal)
    }

    /// Narrow a proposal filter to what the caller may see.
    async fn scope_filter(&self, principal: &Principal, mut filter: ProposalFilter) -> Result<ProposalFilter> {
        if principal.role != Role::Client {
            return Ok(filter);
        }
        let requested_any = filter.statuses.is_empty();
        filter.statuses.retain(|s| s.is_client_visible());
        if filter.statuses.is_empty() {
            filter.statuses = ProposalStatus::CLIENT_VISIBLE.to_vec();
            if !requested_any {
                // Only staff-only statuses were asked for: a scope nobody holds.
                filter.client_scope = Some(ClientScope::default());
                return Ok(filter);
            }
        }
        filter.client_scope = Some(ClientScope {
            client_id: principal.user_id,
            shared_ids: self.shared_proposal_ids(principal.user_id, Utc::now()).await?,
        });
        Ok(filter)
    }

    /// Every proposal visible to the caller, unpaged.
    async fn visible_proposals(&self, principal: &Principal) -> Result<Vec<Proposal>> {
        let filter = self.scope_filter(principal, ProposalFilter::default()).await?;
        self.stores.proposals.list_proposals(&filter).await
    }

    async fn paged_proposals(&self, filter: ProposalFilter) -> Result<Paged<ProposalSummary>> {
        let (limit, offset) = clamp_page(filter.limit, filter.offset);
        let total = self.stores.proposals.count_proposals(&filter).await?;
        let filter = ProposalFilter {
            limit: Some(limit),
            offset: Some(offset),
            ..filter
        };
        let items = self
            .stores
            .proposals
            .list_proposals(&filter)
            .await?
            .iter()
            .map(ProposalSummary::from)
            .collect();
        Ok(Paged {
            items,
            total,
            limit,
            offset,
        })
    }
}

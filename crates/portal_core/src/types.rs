//! Domain types for the project portal.
//!
//! Enum string forms (`as_str` / `from_str`) are the persisted and wire
//! representations; the Postgres adapter binds them as TEXT.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Roles and user state ──────────────────────────────────────

/// Portal role. Declaration order is the privilege order:
/// client < project_manager < admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    ProjectManager,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Client, Role::ProjectManager, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::ProjectManager => "project_manager",
            Self::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "client" => Some(Self::Client),
            "project_manager" => Some(Self::ProjectManager),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Self::ProjectManager | Self::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Inactive,
    Suspended,
    PendingVerification,
}

impl UserStatus {
    pub const ALL: [UserStatus; 4] = [
        UserStatus::Active,
        UserStatus::Inactive,
        UserStatus::Suspended,
        UserStatus::PendingVerification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
            Self::PendingVerification => "pending_verification",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "suspended" => Some(Self::Suspended),
            "pending_verification" => Some(Self::PendingVerification),
            _ => None,
        }
    }

    /// Inactive and suspended accounts cannot log in or refresh.
    pub fn can_authenticate(&self) -> bool {
        matches!(self, Self::Active | Self::PendingVerification)
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stored user row. Never serialized directly; see [`UserView`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub company: Option<String>,
    pub bio: Option<String>,
    pub timezone: String,
    pub role: Role,
    pub status: UserStatus,
    pub is_verified: bool,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    pub fn login_state(&self) -> LoginState {
        LoginState {
            failed_login_attempts: self.failed_login_attempts,
            locked_until: self.locked_until,
            last_login_at: self.last_login_at,
            updated_at: self.updated_at,
        }
    }
}

/// The columns a login attempt is allowed to write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoginState {
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Public projection of a user, safe to return over the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub company: Option<String>,
    pub bio: Option<String>,
    pub timezone: String,
    pub role: Role,
    pub status: UserStatus,
    pub is_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            full_name: u.full_name(),
            phone_number: u.phone_number.clone(),
            company: u.company.clone(),
            bio: u.bio.clone(),
            timezone: u.timezone.clone(),
            role: u.role,
            status: u.status,
            is_verified: u.is_verified,
            last_login_at: u.last_login_at,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

/// Persisted refresh token. Only the SHA-256 of the opaque token is kept.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

// ── Proposals ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    InReview,
    Approved,
    Sent,
    Accepted,
    Rejected,
}

impl ProposalStatus {
    pub const ALL: [ProposalStatus; 6] = [
        ProposalStatus::Draft,
        ProposalStatus::InReview,
        ProposalStatus::Approved,
        ProposalStatus::Sent,
        ProposalStatus::Accepted,
        ProposalStatus::Rejected,
    ];

    /// Statuses a client can ever see.
    pub const CLIENT_VISIBLE: [ProposalStatus; 4] = [
        ProposalStatus::Approved,
        ProposalStatus::Sent,
        ProposalStatus::Accepted,
        ProposalStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "in_review" => Some(Self::InReview),
            "approved" => Some(Self::Approved),
            "sent" => Some(Self::Sent),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_client_visible(&self) -> bool {
        Self::CLIENT_VISIBLE.contains(self)
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPhase {
    Exploratory,
    Discovery,
    Development,
    Deployment,
}

impl ProjectPhase {
    pub const ALL: [ProjectPhase; 4] = [
        ProjectPhase::Exploratory,
        ProjectPhase::Discovery,
        ProjectPhase::Development,
        ProjectPhase::Deployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exploratory => "exploratory",
            Self::Discovery => "discovery",
            Self::Development => "development",
            Self::Deployment => "deployment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "exploratory" => Some(Self::Exploratory),
            "discovery" => Some(Self::Discovery),
            "development" => Some(Self::Development),
            "deployment" => Some(Self::Deployment),
            _ => None,
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Exploratory => Some(Self::Discovery),
            Self::Discovery => Some(Self::Development),
            Self::Development => Some(Self::Deployment),
            Self::Deployment => None,
        }
    }
}

impl std::fmt::Display for ProjectPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub id: Uuid,
    pub project_name: String,
    pub client_name: String,
    pub phase: ProjectPhase,
    pub status: ProposalStatus,
    pub content: String,
    pub requirements: Option<serde_json::Value>,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub client_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing projection without the content body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalSummary {
    pub id: Uuid,
    pub project_name: String,
    pub client_name: String,
    pub phase: ProjectPhase,
    pub status: ProposalStatus,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub client_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Proposal> for ProposalSummary {
    fn from(p: &Proposal) -> Self {
        Self {
            id: p.id,
            project_name: p.project_name.clone(),
            client_name: p.client_name.clone(),
            phase: p.phase,
            status: p.status,
            created_by: p.created_by,
            assigned_to: p.assigned_to,
            client_user_id: p.client_user_id,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalVersion {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub version_number: i32,
    pub content: String,
    pub change_summary: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalShare {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub share_token: String,
    pub recipient_user_id: Option<Uuid>,
    pub created_by: Uuid,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub access_count: i32,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ProposalShare {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && !self.is_expired(now)
    }

    /// True when this share grants `user_id` client access.
    pub fn grants(&self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        self.recipient_user_id == Some(user_id) && self.is_active(now)
    }
}

// ── Project tracking ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Milestone {
    pub status: MilestoneStatus,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Uuid,
}

/// Per-proposal delivery tracker. `current_phase` mirrors `Proposal.phase`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectTracker {
    pub proposal_id: Uuid,
    pub current_phase: ProjectPhase,
    pub exploratory_completed: bool,
    pub discovery_completed: bool,
    pub development_completed: bool,
    pub deployment_completed: bool,
    pub milestones: BTreeMap<String, Milestone>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub actual_completion: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectTracker {
    pub fn new(proposal_id: Uuid, phase: ProjectPhase, now: DateTime<Utc>) -> Self {
        Self {
            proposal_id,
            current_phase: phase,
            exploratory_completed: false,
            discovery_completed: false,
            development_completed: false,
            deployment_completed: false,
            milestones: BTreeMap::new(),
            estimated_completion: None,
            actual_completion: None,
            updated_at: now,
        }
    }

    pub fn is_completed(&self, phase: ProjectPhase) -> bool {
        match phase {
            ProjectPhase::Exploratory => self.exploratory_completed,
            ProjectPhase::Discovery => self.discovery_completed,
            ProjectPhase::Development => self.development_completed,
            ProjectPhase::Deployment => self.deployment_completed,
        }
    }

    pub fn mark_completed(&mut self, phase: ProjectPhase) {
        match phase {
            ProjectPhase::Exploratory => self.exploratory_completed = true,
            ProjectPhase::Discovery => self.discovery_completed = true,
            ProjectPhase::Development => self.development_completed = true,
            ProjectPhase::Deployment => self.deployment_completed = true,
        }
    }

    /// Share of completed phases, 0–100.
    pub fn progress_percent(&self) -> u8 {
        let done = ProjectPhase::ALL
            .iter()
            .filter(|p| self.is_completed(**p))
            .count();
        (done * 100 / ProjectPhase::ALL.len()) as u8
    }
}

// ── Files ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Image,
    Document,
    Spreadsheet,
    Presentation,
    Text,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Spreadsheet => "spreadsheet",
            Self::Presentation => "presentation",
            Self::Text => "text",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "document" => Some(Self::Document),
            "spreadsheet" => Some(Self::Spreadsheet),
            "presentation" => Some(Self::Presentation),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileVisibility {
    Private,
    Proposal,
    Public,
}

impl FileVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Proposal => "proposal",
            Self::Public => "public",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "proposal" => Some(Self::Proposal),
            "public" => Some(Self::Public),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Ready,
    Deleted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(Self::Ready),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub id: Uuid,
    pub filename: String,
    pub original_filename: String,
    pub kind: FileKind,
    pub extension: String,
    pub mime_type: String,
    pub size_bytes: i64,
    #[serde(skip_serializing)]
    pub storage_ref: String,
    pub visibility: FileVisibility,
    pub status: FileStatus,
    pub uploaded_by: Uuid,
    pub proposal_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

// ── Audit ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditTarget {
    Proposal,
    File,
    User,
}

impl AuditTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposal => "proposal",
            Self::File => "file",
            Self::User => "user",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "proposal" => Some(Self::Proposal),
            "file" => Some(Self::File),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

/// Append-only audit record. No port exposes update or delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub target_type: AuditTarget,
    pub target_id: Uuid,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        actor_id: Option<Uuid>,
        action: impl Into<String>,
        target_type: AuditTarget,
        target_id: Uuid,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            action: action.into(),
            target_type,
            target_id,
            detail,
            created_at: Utc::now(),
        }
    }

    pub fn proposal(
        actor_id: Uuid,
        action: impl Into<String>,
        proposal_id: Uuid,
        detail: serde_json::Value,
    ) -> Self {
        Self::new(
            Some(actor_id),
            action,
            AuditTarget::Proposal,
            proposal_id,
            detail,
        )
    }
}

// ── Query filters ─────────────────────────────────────────────

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Clamp caller-supplied paging to sane bounds.
pub fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    /// Case-insensitive match on email, first or last name.
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Restricts a proposal query to what one client may see.
#[derive(Debug, Clone, Default)]
pub struct ClientScope {
    pub client_id: Uuid,
    /// Proposals with an active share granted to the client.
    pub shared_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct ProposalFilter {
    /// Empty means any status.
    pub statuses: Vec<ProposalStatus>,
    pub phase: Option<ProjectPhase>,
    /// Case-insensitive match on project or client name.
    pub search: Option<String>,
    pub created_by: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub client_scope: Option<ClientScope>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ProposalFilter {
    /// In-process predicate matching the Postgres WHERE clause.
    pub fn matches(&self, p: &Proposal) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&p.status) {
            return false;
        }
        if self.phase.is_some_and(|phase| phase != p.phase) {
            return false;
        }
        if self.created_by.is_some_and(|id| id != p.created_by) {
            return false;
        }
        if self.assigned_to.is_some() && self.assigned_to != p.assigned_to {
            return false;
        }
        if let Some(scope) = &self.client_scope {
            let assigned = p.client_user_id == Some(scope.client_id);
            if !assigned && !scope.shared_ids.contains(&p.id) {
                return false;
            }
        }
        if let Some(term) = self.search.as_deref().filter(|t| !t.is_empty()) {
            let term = term.to_lowercase();
            if !p.project_name.to_lowercase().contains(&term)
                && !p.client_name.to_lowercase().contains(&term)
            {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub kind: Option<FileKind>,
    pub proposal_id: Option<Uuid>,
    pub uploaded_by: Option<Uuid>,
    pub visibility: Option<FileVisibility>,
    /// Case-insensitive substring of the original filename.
    pub filename: Option<String>,
    pub include_deleted: bool,
}

impl FileFilter {
    pub fn matches(&self, f: &FileRecord) -> bool {
        if !self.include_deleted && f.status == FileStatus::Deleted {
            return false;
        }
        if self.kind.is_some_and(|k| k != f.kind) {
            return false;
        }
        if self.proposal_id.is_some() && self.proposal_id != f.proposal_id {
            return false;
        }
        if self.uploaded_by.is_some_and(|id| id != f.uploaded_by) {
            return false;
        }
        if self.visibility.is_some_and(|v| v != f.visibility) {
            return false;
        }
        if let Some(name) = self.filename.as_deref().filter(|n| !n.is_empty()) {
            if !f
                .original_filename
                .to_lowercase()
                .contains(&name.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// One page of results plus the unpaged total.
#[derive(Debug, Clone, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

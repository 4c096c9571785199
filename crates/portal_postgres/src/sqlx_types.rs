//! Row shapes as read from Postgres. Enum columns arrive as TEXT and are
//! parsed into domain enums by the `TryFrom` impls; a value outside the
//! CHECK constraint surfaces as an error string.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use portal_core::types::*;

fn parse<T>(column: &str, value: &str, f: impl Fn(&str) -> Option<T>) -> Result<T, String> {
    f(value).ok_or_else(|| format!("unexpected {column} value {value:?}"))
}

pub const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, phone_number, \
     company, bio, timezone, role, status, is_verified, failed_login_attempts, locked_until, \
     last_login_at, created_at, updated_at";

#[derive(Debug, FromRow)]
pub struct PgUserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub company: Option<String>,
    pub bio: Option<String>,
    pub timezone: String,
    pub role: String,
    pub status: String,
    pub is_verified: bool,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgUserRow> for User {
    type Error = String;

    fn try_from(r: PgUserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: r.id,
            email: r.email,
            password_hash: r.password_hash,
            first_name: r.first_name,
            last_name: r.last_name,
            phone_number: r.phone_number,
            company: r.company,
            bio: r.bio,
            timezone: r.timezone,
            role: parse("role", &r.role, Role::from_str)?,
            status: parse("status", &r.status, UserStatus::from_str)?,
            is_verified: r.is_verified,
            failed_login_attempts: r.failed_login_attempts,
            locked_until: r.locked_until,
            last_login_at: r.last_login_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PgRefreshTokenRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<PgRefreshTokenRow> for RefreshTokenRecord {
    fn from(r: PgRefreshTokenRow) -> Self {
        RefreshTokenRecord {
            id: r.id,
            user_id: r.user_id,
            token_hash: r.token_hash,
            expires_at: r.expires_at,
            revoked_at: r.revoked_at,
            created_at: r.created_at,
        }
    }
}

pub const PROPOSAL_COLUMNS: &str = "id, project_name, client_name, phase, status, content, \
     requirements, created_by, assigned_to, client_user_id, created_at, updated_at";

#[derive(Debug, FromRow)]
pub struct PgProposalRow {
    pub id: Uuid,
    pub project_name: String,
    pub client_name: String,
    pub phase: String,
    pub status: String,
    pub content: String,
    pub requirements: Option<serde_json::Value>,
    pub created_by: Uuid,
    pub assigned_to: Option<Uuid>,
    pub client_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgProposalRow> for Proposal {
    type Error = String;

    fn try_from(r: PgProposalRow) -> Result<Self, Self::Error> {
        Ok(Proposal {
            id: r.id,
            project_name: r.project_name,
            client_name: r.client_name,
            phase: parse("phase", &r.phase, ProjectPhase::from_str)?,
            status: parse("status", &r.status, ProposalStatus::from_str)?,
            content: r.content,
            requirements: r.requirements,
            created_by: r.created_by,
            assigned_to: r.assigned_to,
            client_user_id: r.client_user_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PgVersionRow {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub version_number: i32,
    pub content: String,
    pub change_summary: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<PgVersionRow> for ProposalVersion {
    fn from(r: PgVersionRow) -> Self {
        ProposalVersion {
            id: r.id,
            proposal_id: r.proposal_id,
            version_number: r.version_number,
            content: r.content,
            change_summary: r.change_summary,
            created_by: r.created_by,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct PgTrackerRow {
    pub proposal_id: Uuid,
    pub current_phase: String,
    pub exploratory_completed: bool,
    pub discovery_completed: bool,
    pub development_completed: bool,
    pub deployment_completed: bool,
    pub milestones: serde_json::Value,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub actual_completion: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgTrackerRow> for ProjectTracker {
    type Error = String;

    fn try_from(r: PgTrackerRow) -> Result<Self, Self::Error> {
        let milestones: BTreeMap<String, Milestone> =
            serde_json::from_value(r.milestones).map_err(|e| format!("milestones: {e}"))?;
        Ok(ProjectTracker {
            proposal_id: r.proposal_id,
            current_phase: parse("current_phase", &r.current_phase, ProjectPhase::from_str)?,
            exploratory_completed: r.exploratory_completed,
            discovery_completed: r.discovery_completed,
            development_completed: r.development_completed,
            deployment_completed: r.deployment_completed,
            milestones,
            estimated_completion: r.estimated_completion,
            actual_completion: r.actual_completion,
            updated_at: r.updated_at,
        })
    }
}

pub const SHARE_COLUMNS: &str = "id, proposal_id, share_token, recipient_user_id, created_by, \
     expires_at, revoked_at, access_count, last_accessed_at, created_at";

#[derive(Debug, FromRow)]
pub struct PgShareRow {
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

impl From<PgShareRow> for ProposalShare {
    fn from(r: PgShareRow) -> Self {
        ProposalShare {
            id: r.id,
            proposal_id: r.proposal_id,
            share_token: r.share_token,
            recipient_user_id: r.recipient_user_id,
            created_by: r.created_by,
            expires_at: r.expires_at,
            revoked_at: r.revoked_at,
            access_count: r.access_count,
            last_accessed_at: r.last_accessed_at,
            created_at: r.created_at,
        }
    }
}

pub const FILE_COLUMNS: &str = "id, filename, original_filename, kind, extension, mime_type, \
     size_bytes, storage_ref, visibility, status, uploaded_by, proposal_id, created_at, \
     updated_at, deleted_at";

#[derive(Debug, FromRow)]
pub struct PgFileRow {
    pub id: Uuid,
    pub filename: String,
    pub original_filename: String,
    pub kind: String,
    pub extension: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_ref: String,
    pub visibility: String,
    pub status: String,
    pub uploaded_by: Uuid,
    pub proposal_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<PgFileRow> for FileRecord {
    type Error = String;

    fn try_from(r: PgFileRow) -> Result<Self, Self::Error> {
        Ok(FileRecord {
            id: r.id,
            filename: r.filename,
            original_filename: r.original_filename,
            kind: parse("kind", &r.kind, FileKind::from_str)?,
            extension: r.extension,
            mime_type: r.mime_type,
            size_bytes: r.size_bytes,
            storage_ref: r.storage_ref,
            visibility: parse("visibility", &r.visibility, FileVisibility::from_str)?,
            status: parse("status", &r.status, FileStatus::from_str)?,
            uploaded_by: r.uploaded_by,
            proposal_id: r.proposal_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
            deleted_at: r.deleted_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PgAuditRow {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub target_type: String,
    pub target_id: Uuid,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PgAuditRow> for AuditLogEntry {
    type Error = String;

    fn try_from(r: PgAuditRow) -> Result<Self, Self::Error> {
        Ok(AuditLogEntry {
            id: r.id,
            actor_id: r.actor_id,
            action: r.action,
            target_type: parse("target_type", &r.target_type, AuditTarget::from_str)?,
            target_id: r.target_id,
            detail: r.detail,
            created_at: r.created_at,
        })
    }
}

//! Storage port traits. `portal_postgres` implements them against Postgres;
//! [`crate::memory::MemoryStore`] implements them in process.
//!
//! Every proposal mutation goes through a write that carries its audit
//! entry, so the row change and the audit append land together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::PortalError;
use crate::types::*;

pub type Result<T> = std::result::Result<T, PortalError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` when the email is taken.
    async fn insert_user(&self, user: &User) -> Result<()>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;
    /// `email` is matched case-insensitively.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn update_user(&self, user: &User) -> Result<()>;
    /// Writes only the login bookkeeping columns, leaving status, role and
    /// profile as they are in the store.
    async fn record_login_state(&self, id: Uuid, state: &LoginState) -> Result<()>;
    /// Newest first. An unset `limit` returns every match.
    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>>;
    async fn count_users(&self, filter: &UserFilter) -> Result<i64>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<()>;
    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>>;
    /// Idempotent: an already-revoked token keeps its first revocation time.
    async fn revoke_refresh_token(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
    /// Returns how many live tokens were revoked.
    async fn revoke_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64>;
    /// Delete expired and revoked tokens. Returns the number removed.
    async fn purge_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// One atomic proposal write.
pub struct ProposalWrite<'a> {
    pub proposal: &'a Proposal,
    /// `None` inserts a new row. `Some(status)` updates the existing row
    /// only while it still holds that status; otherwise the write fails
    /// with `Conflict` and nothing is stored.
    pub expected_status: Option<ProposalStatus>,
    pub version: Option<&'a ProposalVersion>,
    pub tracker: Option<&'a ProjectTracker>,
    /// At least one entry; a content edit that also moves status records both.
    pub audit: &'a [AuditLogEntry],
}

#[async_trait]
pub trait ProposalStore: Send + Sync {
    async fn save_proposal(&self, write: ProposalWrite<'_>) -> Result<()>;
    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>>;
    /// Removes the proposal with its versions, tracker and shares. The
    /// audit entry (and all earlier ones) survive.
    async fn delete_proposal(&self, id: Uuid, audit: &AuditLogEntry) -> Result<bool>;
    /// Most recently updated first. An unset `limit` returns every match.
    async fn list_proposals(&self, filter: &ProposalFilter) -> Result<Vec<Proposal>>;
    async fn count_proposals(&self, filter: &ProposalFilter) -> Result<i64>;
    /// Ascending by version number.
    async fn list_versions(&self, proposal_id: Uuid) -> Result<Vec<ProposalVersion>>;
    async fn latest_version_number(&self, proposal_id: Uuid) -> Result<i32>;
    async fn get_tracker(&self, proposal_id: Uuid) -> Result<Option<ProjectTracker>>;
}

#[async_trait]
pub trait ShareStore: Send + Sync {
    async fn insert_share(&self, share: &ProposalShare, audit: &AuditLogEntry) -> Result<()>;
    async fn find_share_by_token(&self, token: &str) -> Result<Option<ProposalShare>>;
    async fn get_share(&self, id: Uuid) -> Result<Option<ProposalShare>>;
    async fn list_shares(&self, proposal_id: Uuid) -> Result<Vec<ProposalShare>>;
    /// Shares naming `user_id` as recipient, active or not.
    async fn list_shares_for_recipient(&self, user_id: Uuid) -> Result<Vec<ProposalShare>>;
    async fn revoke_share(&self, id: Uuid, at: DateTime<Utc>, audit: &AuditLogEntry) -> Result<()>;
    async fn record_share_access(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Insert or update, appending `audit` in the same write.
    async fn save_file(&self, file: &FileRecord, audit: &AuditLogEntry) -> Result<()>;
    async fn get_file(&self, id: Uuid) -> Result<Option<FileRecord>>;
    /// Newest first.
    async fn list_files(&self, filter: &FileFilter) -> Result<Vec<FileRecord>>;
}

/// Append-only. There is intentionally no update or delete.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()>;
    /// Oldest first.
    async fn list_for_target(&self, target_type: AuditTarget, target_id: Uuid) -> Result<Vec<AuditLogEntry>>;
    /// Newest first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<AuditLogEntry>>;
}

/// Binary storage for uploaded files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store content under `key`, returning the reference to persist.
    async fn store(&self, key: &str, content: &[u8], content_type: &str) -> Result<String>;
    async fn fetch(&self, blob_ref: &str) -> Result<Vec<u8>>;
    /// Missing blobs are not an error.
    async fn delete(&self, blob_ref: &str) -> Result<()>;
}

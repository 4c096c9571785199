//! In-process implementation of every port, for tests and database-less
//! development runs. One lock guards all tables so multi-table writes are
//! atomic, mirroring the Postgres transactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::PortalError;
use crate::ports::*;
use crate::types::*;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
    proposals: HashMap<Uuid, Proposal>,
    versions: Vec<ProposalVersion>,
    trackers: HashMap<Uuid, ProjectTracker>,
    shares: HashMap<Uuid, ProposalShare>,
    files: HashMap<Uuid, FileRecord>,
    audit: Vec<AuditLogEntry>,
    blobs: HashMap<String, Vec<u8>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T>(items: Vec<T>, limit: Option<i64>, offset: Option<i64>) -> Vec<T> {
    let offset = offset.unwrap_or(0).max(0) as usize;
    let limit = limit.map_or(usize::MAX, |l| l.max(0) as usize);
    items.into_iter().skip(offset).take(limit).collect()
}

fn user_matches(filter: &UserFilter, u: &User) -> bool {
    if filter.role.is_some_and(|r| r != u.role) {
        return false;
    }
    if filter.status.is_some_and(|s| s != u.status) {
        return false;
    }
    if let Some(term) = filter.search.as_deref().filter(|t| !t.is_empty()) {
        let term = term.to_lowercase();
        return u.email.to_lowercase().contains(&term)
            || u.first_name.to_lowercase().contains(&term)
            || u.last_name.to_lowercase().contains(&term);
    }
    true
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(PortalError::Conflict(format!(
                "email {} is already registered",
                user.email
            )));
        }
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let mut t = self.tables.write().await;
        if !t.users.contains_key(&user.id) {
            return Err(PortalError::not_found("user", user.id));
        }
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn record_login_state(&self, id: Uuid, state: &LoginState) -> Result<()> {
        let mut t = self.tables.write().await;
        let user = t
            .users
            .get_mut(&id)
            .ok_or_else(|| PortalError::not_found("user", id))?;
        user.failed_login_attempts = state.failed_login_attempts;
        user.locked_until = state.locked_until;
        user.last_login_at = state.last_login_at;
        user.updated_at = state.updated_at;
        Ok(())
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>> {
        let t = self.tables.read().await;
        let mut users: Vec<User> = t
            .users
            .values()
            .filter(|u| user_matches(filter, u))
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(users, filter.limit, filter.offset))
    }

    async fn count_users(&self, filter: &UserFilter) -> Result<i64> {
        let t = self.tables.read().await;
        Ok(t.users.values().filter(|u| user_matches(filter, u)).count() as i64)
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<()> {
        let mut t = self.tables.write().await;
        t.refresh_tokens.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let t = self.tables.read().await;
        Ok(t.refresh_tokens
            .values()
            .find(|r| r.token_hash == token_hash)
            .cloned())
    }

    async fn revoke_refresh_token(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut t = self.tables.write().await;
        if let Some(r) = t.refresh_tokens.get_mut(&id) {
            r.revoked_at.get_or_insert(at);
        }
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        let mut t = self.tables.write().await;
        let mut revoked = 0;
        for r in t.refresh_tokens.values_mut() {
            if r.user_id == user_id && r.revoked_at.is_none() {
                r.revoked_at = Some(at);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn purge_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut t = self.tables.write().await;
        let before = t.refresh_tokens.len();
        t.refresh_tokens.retain(|_, r| r.is_live(now));
        Ok((before - t.refresh_tokens.len()) as u64)
    }
}

fn sorted_proposals(t: &Tables, filter: &ProposalFilter) -> Vec<Proposal> {
    let mut out: Vec<Proposal> = t
        .proposals
        .values()
        .filter(|p| filter.matches(p))
        .cloned()
        .collect();
    out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    out
}

#[async_trait]
impl ProposalStore for MemoryStore {
    async fn save_proposal(&self, write: ProposalWrite<'_>) -> Result<()> {
        let mut t = self.tables.write().await;
        let id = write.proposal.id;
        let stored = t.proposals.get(&id).map(|p| p.status);
        match (write.expected_status, stored) {
            (None, Some(_)) => {
                return Err(PortalError::Conflict(format!("proposal {id} already exists")));
            }
            (Some(_), None) => return Err(PortalError::not_found("proposal", id)),
            (Some(expected), Some(actual)) if expected != actual => {
                return Err(PortalError::Conflict(format!(
                    "proposal {id} changed concurrently (now {actual})"
                )));
            }
            _ => {}
        }
        if let Some(v) = write.version {
            if t.versions
                .iter()
                .any(|e| e.proposal_id == id && e.version_number == v.version_number)
            {
                return Err(PortalError::Conflict(format!(
                    "version {} of proposal {id} already exists",
                    v.version_number
                )));
            }
        }
        t.proposals.insert(id, write.proposal.clone());
        if let Some(v) = write.version {
            t.versions.push(v.clone());
        }
        if let Some(tracker) = write.tracker {
            t.trackers.insert(id, tracker.clone());
        }
        t.audit.extend_from_slice(write.audit);
        Ok(())
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>> {
        Ok(self.tables.read().await.proposals.get(&id).cloned())
    }

    async fn delete_proposal(&self, id: Uuid, audit: &AuditLogEntry) -> Result<bool> {
        let mut t = self.tables.write().await;
        if t.proposals.remove(&id).is_none() {
            return Ok(false);
        }
        t.versions.retain(|v| v.proposal_id != id);
        t.trackers.remove(&id);
        t.shares.retain(|_, s| s.proposal_id != id);
        for f in t.files.values_mut() {
            if f.proposal_id == Some(id) {
                f.proposal_id = None;
            }
        }
        t.audit.push(audit.clone());
        Ok(true)
    }

    async fn list_proposals(&self, filter: &ProposalFilter) -> Result<Vec<Proposal>> {
        let t = self.tables.read().await;
        Ok(page(sorted_proposals(&t, filter), filter.limit, filter.offset))
    }

    async fn count_proposals(&self, filter: &ProposalFilter) -> Result<i64> {
        let t = self.tables.read().await;
        Ok(t.proposals.values().filter(|p| filter.matches(p)).count() as i64)
    }

    async fn list_versions(&self, proposal_id: Uuid) -> Result<Vec<ProposalVersion>> {
        let t = self.tables.read().await;
        let mut versions: Vec<ProposalVersion> = t
            .versions
            .iter()
            .filter(|v| v.proposal_id == proposal_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    async fn latest_version_number(&self, proposal_id: Uuid) -> Result<i32> {
        let t = self.tables.read().await;
        Ok(t.versions
            .iter()
            .filter(|v| v.proposal_id == proposal_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0))
    }

    async fn get_tracker(&self, proposal_id: Uuid) -> Result<Option<ProjectTracker>> {
        Ok(self.tables.read().await.trackers.get(&proposal_id).cloned())
    }
}

#[async_trait]
impl ShareStore for MemoryStore {
    async fn insert_share(&self, share: &ProposalShare, audit: &AuditLogEntry) -> Result<()> {
        let mut t = self.tables.write().await;
        if !t.proposals.contains_key(&share.proposal_id) {
            return Err(PortalError::not_found("proposal", share.proposal_id));
        }
        t.shares.insert(share.id, share.clone());
        t.audit.push(audit.clone());
        Ok(())
    }

    async fn find_share_by_token(&self, token: &str) -> Result<Option<ProposalShare>> {
        let t = self.tables.read().await;
        Ok(t.shares.values().find(|s| s.share_token == token).cloned())
    }

    async fn get_share(&self, id: Uuid) -> Result<Option<ProposalShare>> {
        Ok(self.tables.read().await.shares.get(&id).cloned())
    }

    async fn list_shares(&self, proposal_id: Uuid) -> Result<Vec<ProposalShare>> {
        let t = self.tables.read().await;
        let mut shares: Vec<ProposalShare> = t
            .shares
            .values()
            .filter(|s| s.proposal_id == proposal_id)
            .cloned()
            .collect();
        shares.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(shares)
    }

    async fn list_shares_for_recipient(&self, user_id: Uuid) -> Result<Vec<ProposalShare>> {
        let t = self.tables.read().await;
        Ok(t.shares
            .values()
            .filter(|s| s.recipient_user_id == Some(user_id))
            .cloned()
            .collect())
    }

    async fn revoke_share(&self, id: Uuid, at: DateTime<Utc>, audit: &AuditLogEntry) -> Result<()> {
        let mut t = self.tables.write().await;
        let share = t
            .shares
            .get_mut(&id)
            .ok_or_else(|| PortalError::not_found("share", id))?;
        share.revoked_at.get_or_insert(at);
        t.audit.push(audit.clone());
        Ok(())
    }

    async fn record_share_access(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut t = self.tables.write().await;
        if let Some(s) = t.shares.get_mut(&id) {
            s.access_count += 1;
            s.last_accessed_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn save_file(&self, file: &FileRecord, audit: &AuditLogEntry) -> Result<()> {
        let mut t = self.tables.write().await;
        t.files.insert(file.id, file.clone());
        t.audit.push(audit.clone());
        Ok(())
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<FileRecord>> {
        Ok(self.tables.read().await.files.get(&id).cloned())
    }

    async fn list_files(&self, filter: &FileFilter) -> Result<Vec<FileRecord>> {
        let t = self.tables.read().await;
        let mut files: Vec<FileRecord> = t
            .files
            .values()
            .filter(|f| filter.matches(f))
            .cloned()
            .collect();
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(files)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        self.tables.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn list_for_target(&self, target_type: AuditTarget, target_id: Uuid) -> Result<Vec<AuditLogEntry>> {
        let t = self.tables.read().await;
        Ok(t.audit
            .iter()
            .filter(|e| e.target_type == target_type && e.target_id == target_id)
            .cloned()
            .collect())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<AuditLogEntry>> {
        let t = self.tables.read().await;
        Ok(t.audit
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn store(&self, key: &str, content: &[u8], _content_type: &str) -> Result<String> {
        let blob_ref = format!("memory://{key}");
        let mut t = self.tables.write().await;
        t.blobs.insert(blob_ref.clone(), content.to_vec());
        Ok(blob_ref)
    }

    async fn fetch(&self, blob_ref: &str) -> Result<Vec<u8>> {
        let t = self.tables.read().await;
        t.blobs
            .get(blob_ref)
            .cloned()
            .ok_or_else(|| PortalError::NotFound(format!("blob {blob_ref}")))
    }

    async fn delete(&self, blob_ref: &str) -> Result<()> {
        self.tables.write().await.blobs.remove(blob_ref);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: email.into(),
            password_hash: "x".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone_number: None,
            company: None,
            bio: None,
            timezone: "UTC".into(),
            role: Role::Client,
            status: UserStatus::Active,
            is_verified: false,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_case_insensitively() {
        let store = MemoryStore::new();
        store.insert_user(&user("ada@example.com")).await.unwrap();
        let err = store.insert_user(&user("ADA@example.com")).await.unwrap_err();
        assert!(matches!(err, PortalError::Conflict(_)));
        assert!(store
            .find_user_by_email("Ada@Example.com")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn login_state_write_keeps_a_concurrent_suspension() {
        let store = MemoryStore::new();
        let loaded = user("ada@example.com");
        store.insert_user(&loaded).await.unwrap();

        let mut suspended = loaded.clone();
        suspended.status = UserStatus::Suspended;
        store.update_user(&suspended).await.unwrap();

        // A login that read the row before the suspension.
        let mut stale = loaded.clone();
        stale.failed_login_attempts = 2;
        stale.last_login_at = Some(Utc::now());
        store.record_login_state(stale.id, &stale.login_state()).await.unwrap();

        let stored = store.get_user(loaded.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UserStatus::Suspended);
        assert_eq!(stored.failed_login_attempts, 2);
        assert!(matches!(
            store.record_login_state(Uuid::new_v4(), &stale.login_state()).await,
            Err(PortalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn revoke_all_only_touches_live_tokens() {
        let store = MemoryStore::new();
        let uid = Uuid::new_v4();
        let now = Utc::now();
        for _ in 0..2 {
            store
                .insert_refresh_token(&RefreshTokenRecord {
                    id: Uuid::new_v4(),
                    user_id: uid,
                    token_hash: Uuid::new_v4().to_string(),
                    expires_at: now + chrono::Duration::days(1),
                    revoked_at: None,
                    created_at: now,
                })
                .await
                .unwrap();
        }
        assert_eq!(store.revoke_all_for_user(uid, now).await.unwrap(), 2);
        assert_eq!(store.revoke_all_for_user(uid, now).await.unwrap(), 0);
        assert_eq!(store.purge_refresh_tokens(now).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn blob_round_trip() {
        let store = MemoryStore::new();
        let r = store.store("general/text/a.txt", b"hi", "text/plain").await.unwrap();
        assert_eq!(r, "memory://general/text/a.txt");
        assert_eq!(store.fetch(&r).await.unwrap(), b"hi");
        store.delete(&r).await.unwrap();
        assert!(store.fetch(&r).await.is_err());
    }
}

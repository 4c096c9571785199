//! Postgres implementations of all portal_core port traits.
//!
//! Each adapter is a newtype wrapping PgPool. All SQL is runtime-checked
//! (sqlx::query, not sqlx::query!) to avoid compile-time DB requirement.
//! Multi-row writes run in one transaction with their audit entries.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use portal_core::error::PortalError;
use portal_core::ports::{
    AuditStore, FileStore, ProposalStore, ProposalWrite, RefreshTokenStore, Result, ShareStore,
    UserStore,
};
use portal_core::types::*;

use crate::sqlx_types::*;

fn decode<R, T>(row: R) -> Result<T>
where
    T: TryFrom<R, Error = String>,
{
    T::try_from(row).map_err(|e| PortalError::Internal(anyhow!(e)))
}

fn decode_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = String>,
{
    rows.into_iter().map(decode).collect()
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// `%term%` for ILIKE, with the pattern metacharacters escaped.
pub(crate) fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

async fn insert_audit(conn: &mut PgConnection, entry: &AuditLogEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO portal.audit_log (id, actor_id, action, target_type, target_id, detail, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.id)
    .bind(entry.actor_id)
    .bind(&entry.action)
    .bind(entry.target_type.as_str())
    .bind(entry.target_id)
    .bind(&entry.detail)
    .bind(entry.created_at)
    .execute(conn)
    .await
    .map_err(|e| anyhow!(e))?;
    Ok(())
}

// ── PgUserStore ───────────────────────────────────────────────

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_user_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    if let Some(role) = filter.role {
        qb.push(" AND role = ").push_bind(role.as_str());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(term) = filter.search.as_deref().filter(|t| !t.is_empty()) {
        let pattern = like_pattern(term);
        qb.push(" AND (email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO portal.users (
                id, email, password_hash, first_name, last_name, phone_number,
                company, bio, timezone, role, status, is_verified,
                failed_login_attempts, locked_until, last_login_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .bind(&user.company)
        .bind(&user.bio)
        .bind(&user.timezone)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(user.is_verified)
        .bind(user.failed_login_attempts)
        .bind(user.locked_until)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(PortalError::Conflict(format!(
                "email {} is already registered",
                user.email
            ))),
            Err(e) => Err(anyhow!(e).into()),
        }
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, PgUserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM portal.users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(decode).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, PgUserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM portal.users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(decode).transpose()
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE portal.users SET
                email = $2, password_hash = $3, first_name = $4, last_name = $5,
                phone_number = $6, company = $7, bio = $8, timezone = $9, role = $10,
                status = $11, is_verified = $12, failed_login_attempts = $13,
                locked_until = $14, last_login_at = $15, updated_at = $16
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .bind(&user.company)
        .bind(&user.bio)
        .bind(&user.timezone)
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(user.is_verified)
        .bind(user.failed_login_attempts)
        .bind(user.locked_until)
        .bind(user.last_login_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Err(PortalError::not_found("user", user.id));
        }
        Ok(())
    }

    async fn record_login_state(&self, id: Uuid, state: &LoginState) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE portal.users SET
                failed_login_attempts = $2, locked_until = $3,
                last_login_at = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(state.failed_login_attempts)
        .bind(state.locked_until)
        .bind(state.last_login_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Err(PortalError::not_found("user", id));
        }
        Ok(())
    }

    async fn list_users(&self, filter: &UserFilter) -> Result<Vec<User>> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {USER_COLUMNS} FROM portal.users WHERE 1=1"
        ));
        push_user_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);
        let rows = qb
            .build_query_as::<PgUserRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        decode_all(rows)
    }

    async fn count_users(&self, filter: &UserFilter) -> Result<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM portal.users WHERE 1=1");
        push_user_filter(&mut qb, filter);
        let count = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(count)
    }
}

// ── PgRefreshTokenStore ───────────────────────────────────────

pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO portal.refresh_tokens (id, user_id, token_hash, expires_at, revoked_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.token_hash)
        .bind(record.expires_at)
        .bind(record.revoked_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let row = sqlx::query_as::<_, PgRefreshTokenRow>(
            r#"
            SELECT id, user_id, token_hash, expires_at, revoked_at, created_at
            FROM portal.refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(row.map(RefreshTokenRecord::from))
    }

    async fn revoke_refresh_token(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE portal.refresh_tokens SET revoked_at = COALESCE(revoked_at, $2) WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE portal.refresh_tokens SET revoked_at = $2
            WHERE user_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected())
    }

    async fn purge_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM portal.refresh_tokens WHERE revoked_at IS NOT NULL OR expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(result.rows_affected())
    }
}

// ── PgProposalStore ───────────────────────────────────────────

pub struct PgProposalStore {
    pool: PgPool,
}

impl PgProposalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Mirrors `ProposalFilter::matches`.
fn push_proposal_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ProposalFilter) {
    if !filter.statuses.is_empty() {
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        qb.push(" AND status = ANY(").push_bind(statuses).push(")");
    }
    if let Some(phase) = filter.phase {
        qb.push(" AND phase = ").push_bind(phase.as_str());
    }
    if let Some(created_by) = filter.created_by {
        qb.push(" AND created_by = ").push_bind(created_by);
    }
    if let Some(assigned_to) = filter.assigned_to {
        qb.push(" AND assigned_to = ").push_bind(assigned_to);
    }
    if let Some(scope) = &filter.client_scope {
        qb.push(" AND (client_user_id = ")
            .push_bind(scope.client_id)
            .push(" OR id = ANY(")
            .push_bind(scope.shared_ids.clone())
            .push("))");
    }
    if let Some(term) = filter.search.as_deref().filter(|t| !t.is_empty()) {
        let pattern = like_pattern(term);
        qb.push(" AND (project_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR client_name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

async fn insert_proposal(conn: &mut PgConnection, p: &Proposal) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO portal.proposals (
            id, project_name, client_name, phase, status, content, requirements,
            created_by, assigned_to, client_user_id, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(p.id)
    .bind(&p.project_name)
    .bind(&p.client_name)
    .bind(p.phase.as_str())
    .bind(p.status.as_str())
    .bind(&p.content)
    .bind(&p.requirements)
    .bind(p.created_by)
    .bind(p.assigned_to)
    .bind(p.client_user_id)
    .bind(p.created_at)
    .bind(p.updated_at)
    .execute(conn)
    .await;
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(PortalError::Conflict(format!(
            "proposal {} already exists",
            p.id
        ))),
        Err(e) => Err(anyhow!(e).into()),
    }
}

/// Update in place while the stored status is still `expected`.
async fn update_proposal_row(
    conn: &mut PgConnection,
    p: &Proposal,
    expected: ProposalStatus,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE portal.proposals SET
            project_name = $3, client_name = $4, phase = $5, status = $6,
            content = $7, requirements = $8, assigned_to = $9,
            client_user_id = $10, updated_at = $11
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(p.id)
    .bind(expected.as_str())
    .bind(&p.project_name)
    .bind(&p.client_name)
    .bind(p.phase.as_str())
    .bind(p.status.as_str())
    .bind(&p.content)
    .bind(&p.requirements)
    .bind(p.assigned_to)
    .bind(p.client_user_id)
    .bind(p.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| anyhow!(e))?;
    if result.rows_affected() > 0 {
        return Ok(());
    }

    let current: Option<String> =
        sqlx::query_scalar("SELECT status FROM portal.proposals WHERE id = $1")
            .bind(p.id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| anyhow!(e))?;
    match current {
        None => Err(PortalError::not_found("proposal", p.id)),
        Some(actual) => Err(PortalError::Conflict(format!(
            "proposal {} changed concurrently (now {actual})",
            p.id
        ))),
    }
}

async fn insert_version(conn: &mut PgConnection, v: &ProposalVersion) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO portal.proposal_versions (
            id, proposal_id, version_number, content, change_summary, created_by, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(v.id)
    .bind(v.proposal_id)
    .bind(v.version_number)
    .bind(&v.content)
    .bind(&v.change_summary)
    .bind(v.created_by)
    .bind(v.created_at)
    .execute(conn)
    .await;
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(PortalError::Conflict(format!(
            "version {} of proposal {} already exists",
            v.version_number, v.proposal_id
        ))),
        Err(e) => Err(anyhow!(e).into()),
    }
}

async fn upsert_tracker(conn: &mut PgConnection, t: &ProjectTracker) -> Result<()> {
    let milestones = serde_json::to_value(&t.milestones).map_err(|e| anyhow!(e))?;
    sqlx::query(
        r#"
        INSERT INTO portal.project_trackers (
            proposal_id, current_phase, exploratory_completed, discovery_completed,
            development_completed, deployment_completed, milestones,
            estimated_completion, actual_completion, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (proposal_id) DO UPDATE SET
            current_phase = EXCLUDED.current_phase,
            exploratory_completed = EXCLUDED.exploratory_completed,
            discovery_completed = EXCLUDED.discovery_completed,
            development_completed = EXCLUDED.development_completed,
            deployment_completed = EXCLUDED.deployment_completed,
            milestones = EXCLUDED.milestones,
            estimated_completion = EXCLUDED.estimated_completion,
            actual_completion = EXCLUDED.actual_completion,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(t.proposal_id)
    .bind(t.current_phase.as_str())
    .bind(t.exploratory_completed)
    .bind(t.discovery_completed)
    .bind(t.development_completed)
    .bind(t.deployment_completed)
    .bind(milestones)
    .bind(t.estimated_completion)
    .bind(t.actual_completion)
    .bind(t.updated_at)
    .execute(conn)
    .await
    .map_err(|e| anyhow!(e))?;
    Ok(())
}

#[async_trait]
impl ProposalStore for PgProposalStore {
    async fn save_proposal(&self, write: ProposalWrite<'_>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        // An early return drops `tx`, which rolls back.
        match write.expected_status {
            None => insert_proposal(&mut tx, write.proposal).await?,
            Some(expected) => update_proposal_row(&mut tx, write.proposal, expected).await?,
        }
        if let Some(version) = write.version {
            insert_version(&mut tx, version).await?;
        }
        if let Some(tracker) = write.tracker {
            upsert_tracker(&mut tx, tracker).await?;
        }
        for entry in write.audit {
            insert_audit(&mut tx, entry).await?;
        }

        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>> {
        let row = sqlx::query_as::<_, PgProposalRow>(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM portal.proposals WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(decode).transpose()
    }

    async fn delete_proposal(&self, id: Uuid, audit: &AuditLogEntry) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        // Versions, tracker and shares cascade; files are detached.
        let result = sqlx::query("DELETE FROM portal.proposals WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        insert_audit(&mut tx, audit).await?;

        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(true)
    }

    async fn list_proposals(&self, filter: &ProposalFilter) -> Result<Vec<Proposal>> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {PROPOSAL_COLUMNS} FROM portal.proposals WHERE 1=1"
        ));
        push_proposal_filter(&mut qb, filter);
        qb.push(" ORDER BY updated_at DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);
        let rows = qb
            .build_query_as::<PgProposalRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        decode_all(rows)
    }

    async fn count_proposals(&self, filter: &ProposalFilter) -> Result<i64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM portal.proposals WHERE 1=1");
        push_proposal_filter(&mut qb, filter);
        let count = qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        Ok(count)
    }

    async fn list_versions(&self, proposal_id: Uuid) -> Result<Vec<ProposalVersion>> {
        let rows = sqlx::query_as::<_, PgVersionRow>(
            r#"
            SELECT id, proposal_id, version_number, content, change_summary, created_by, created_at
            FROM portal.proposal_versions
            WHERE proposal_id = $1
            ORDER BY version_number
            "#,
        )
        .bind(proposal_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(rows.into_iter().map(ProposalVersion::from).collect())
    }

    async fn latest_version_number(&self, proposal_id: Uuid) -> Result<i32> {
        let latest = sqlx::query_scalar::<_, Option<i32>>(
            "SELECT MAX(version_number) FROM portal.proposal_versions WHERE proposal_id = $1",
        )
        .bind(proposal_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(latest.unwrap_or(0))
    }

    async fn get_tracker(&self, proposal_id: Uuid) -> Result<Option<ProjectTracker>> {
        let row = sqlx::query_as::<_, PgTrackerRow>(
            r#"
            SELECT proposal_id, current_phase, exploratory_completed, discovery_completed,
                   development_completed, deployment_completed, milestones,
                   estimated_completion, actual_completion, updated_at
            FROM portal.project_trackers
            WHERE proposal_id = $1
            "#,
        )
        .bind(proposal_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(decode).transpose()
    }
}

// ── PgShareStore ──────────────────────────────────────────────

pub struct PgShareStore {
    pool: PgPool,
}

impl PgShareStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, clause: &str, id: Uuid) -> Result<Vec<ProposalShare>> {
        let rows = sqlx::query_as::<_, PgShareRow>(&format!(
            "SELECT {SHARE_COLUMNS} FROM portal.proposal_shares WHERE {clause} ORDER BY created_at"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(rows.into_iter().map(ProposalShare::from).collect())
    }
}

#[async_trait]
impl ShareStore for PgShareStore {
    async fn insert_share(&self, share: &ProposalShare, audit: &AuditLogEntry) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        let result = sqlx::query(
            r#"
            INSERT INTO portal.proposal_shares (
                id, proposal_id, share_token, recipient_user_id, created_by,
                expires_at, revoked_at, access_count, last_accessed_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(share.id)
        .bind(share.proposal_id)
        .bind(&share.share_token)
        .bind(share.recipient_user_id)
        .bind(share.created_by)
        .bind(share.expires_at)
        .bind(share.revoked_at)
        .bind(share.access_count)
        .bind(share.last_accessed_at)
        .bind(share.created_at)
        .execute(&mut *tx)
        .await;
        match result {
            Ok(_) => {}
            Err(e) if is_foreign_key_violation(&e) => {
                return Err(PortalError::not_found("proposal", share.proposal_id));
            }
            Err(e) => return Err(anyhow!(e).into()),
        }
        insert_audit(&mut tx, audit).await?;

        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn find_share_by_token(&self, token: &str) -> Result<Option<ProposalShare>> {
        let row = sqlx::query_as::<_, PgShareRow>(&format!(
            "SELECT {SHARE_COLUMNS} FROM portal.proposal_shares WHERE share_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(row.map(ProposalShare::from))
    }

    async fn get_share(&self, id: Uuid) -> Result<Option<ProposalShare>> {
        Ok(self.fetch_where("id = $1", id).await?.into_iter().next())
    }

    async fn list_shares(&self, proposal_id: Uuid) -> Result<Vec<ProposalShare>> {
        self.fetch_where("proposal_id = $1", proposal_id).await
    }

    async fn list_shares_for_recipient(&self, user_id: Uuid) -> Result<Vec<ProposalShare>> {
        self.fetch_where("recipient_user_id = $1", user_id).await
    }

    async fn revoke_share(&self, id: Uuid, at: DateTime<Utc>, audit: &AuditLogEntry) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        let result = sqlx::query(
            "UPDATE portal.proposal_shares SET revoked_at = COALESCE(revoked_at, $2) WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Err(PortalError::not_found("share", id));
        }
        insert_audit(&mut tx, audit).await?;

        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn record_share_access(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE portal.proposal_shares
            SET access_count = access_count + 1, last_accessed_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        Ok(())
    }
}

// ── PgFileStore ───────────────────────────────────────────────

pub struct PgFileStore {
    pool: PgPool,
}

impl PgFileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Mirrors `FileFilter::matches`.
fn push_file_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &FileFilter) {
    if !filter.include_deleted {
        qb.push(" AND status <> ").push_bind(FileStatus::Deleted.as_str());
    }
    if let Some(kind) = filter.kind {
        qb.push(" AND kind = ").push_bind(kind.as_str());
    }
    if let Some(proposal_id) = filter.proposal_id {
        qb.push(" AND proposal_id = ").push_bind(proposal_id);
    }
    if let Some(uploaded_by) = filter.uploaded_by {
        qb.push(" AND uploaded_by = ").push_bind(uploaded_by);
    }
    if let Some(visibility) = filter.visibility {
        qb.push(" AND visibility = ").push_bind(visibility.as_str());
    }
    if let Some(name) = filter.filename.as_deref().filter(|n| !n.is_empty()) {
        qb.push(" AND original_filename ILIKE ")
            .push_bind(like_pattern(name));
    }
}

#[async_trait]
impl FileStore for PgFileStore {
    async fn save_file(&self, file: &FileRecord, audit: &AuditLogEntry) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow!(e))?;

        sqlx::query(
            r#"
            INSERT INTO portal.files (
                id, filename, original_filename, kind, extension, mime_type, size_bytes,
                storage_ref, visibility, status, uploaded_by, proposal_id,
                created_at, updated_at, deleted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                visibility = EXCLUDED.visibility,
                status = EXCLUDED.status,
                proposal_id = EXCLUDED.proposal_id,
                updated_at = EXCLUDED.updated_at,
                deleted_at = EXCLUDED.deleted_at
            "#,
        )
        .bind(file.id)
        .bind(&file.filename)
        .bind(&file.original_filename)
        .bind(file.kind.as_str())
        .bind(&file.extension)
        .bind(&file.mime_type)
        .bind(file.size_bytes)
        .bind(&file.storage_ref)
        .bind(file.visibility.as_str())
        .bind(file.status.as_str())
        .bind(file.uploaded_by)
        .bind(file.proposal_id)
        .bind(file.created_at)
        .bind(file.updated_at)
        .bind(file.deleted_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow!(e))?;
        insert_audit(&mut tx, audit).await?;

        tx.commit().await.map_err(|e| anyhow!(e))?;
        Ok(())
    }

    async fn get_file(&self, id: Uuid) -> Result<Option<FileRecord>> {
        let row = sqlx::query_as::<_, PgFileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM portal.files WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        row.map(decode).transpose()
    }

    async fn list_files(&self, filter: &FileFilter) -> Result<Vec<FileRecord>> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {FILE_COLUMNS} FROM portal.files WHERE 1=1"
        ));
        push_file_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC");
        let rows = qb
            .build_query_as::<PgFileRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow!(e))?;
        decode_all(rows)
    }
}

// ── PgAuditStore ──────────────────────────────────────────────

pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, entry: &AuditLogEntry) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| anyhow!(e))?;
        insert_audit(&mut conn, entry).await
    }

    async fn list_for_target(&self, target_type: AuditTarget, target_id: Uuid) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query_as::<_, PgAuditRow>(
            r#"
            SELECT id, actor_id, action, target_type, target_id, detail, created_at
            FROM portal.audit_log
            WHERE target_type = $1 AND target_id = $2
            ORDER BY created_at
            "#,
        )
        .bind(target_type.as_str())
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        decode_all(rows)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<AuditLogEntry>> {
        let rows = sqlx::query_as::<_, PgAuditRow>(
            r#"
            SELECT id, actor_id, action, target_type, target_id, detail, created_at
            FROM portal.audit_log
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow!(e))?;
        decode_all(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("acme"), "%acme%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn proposal_filter_sql_binds_every_clause() {
        let filter = ProposalFilter {
            statuses: vec![ProposalStatus::Sent],
            phase: Some(ProjectPhase::Discovery),
            search: Some("acme".into()),
            client_scope: Some(ClientScope {
                client_id: Uuid::new_v4(),
                shared_ids: vec![Uuid::new_v4()],
            }),
            ..ProposalFilter::default()
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM portal.proposals WHERE 1=1");
        push_proposal_filter(&mut qb, &filter);
        let sql = qb.sql();
        assert!(sql.contains("status = ANY($1)"));
        assert!(sql.contains("phase = $2"));
        assert!(sql.contains("client_user_id = $3 OR id = ANY($4)"));
        assert!(sql.contains("project_name ILIKE $5 OR client_name ILIKE $6"));
    }

    #[test]
    fn empty_search_adds_no_clause() {
        let filter = UserFilter {
            search: Some(String::new()),
            ..UserFilter::default()
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM portal.users WHERE 1=1");
        push_user_filter(&mut qb, &filter);
        assert_eq!(qb.sql(), "SELECT 1 FROM portal.users WHERE 1=1");
    }
}

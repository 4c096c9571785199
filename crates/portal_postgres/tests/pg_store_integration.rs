//! Postgres adapter integration tests.
//!
//! Requires a running PostgreSQL database; migrations are applied on connect.
//! Run with: DATABASE_URL="postgresql:///portal_test" cargo test -p portal_postgres --test pg_store_integration -- --ignored --nocapture

use chrono::{Duration, Utc};
use portal_core::ports::{AuditStore, ProposalStore, ProposalWrite, ShareStore, UserStore};
use portal_core::types::*;
use portal_postgres::{connect, run_migrations, DatabaseConfig, PgStores};
use uuid::Uuid;

async fn stores() -> (PgStores, sqlx::PgPool) {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    let pool = connect(&DatabaseConfig::new(database_url, 5))
        .await
        .expect("failed to connect to test database");
    run_migrations(&pool).await.expect("migrations failed");
    (PgStores::new(pool.clone()), pool)
}

fn user(role: Role) -> User {
    let now = Utc::now();
    User {
        id: Uuid::new_v4(),
        email: format!("{}@it.example.com", Uuid::new_v4()),
        password_hash: "$2b$04$invalidinvalidinvalidinvalidinvalidinvalidinvalidinv".into(),
        first_name: "Integration".into(),
        last_name: role.as_str().into(),
        phone_number: None,
        company: None,
        bio: None,
        timezone: "UTC".into(),
        role,
        status: UserStatus::Active,
        is_verified: true,
        failed_login_attempts: 0,
        locked_until: None,
        last_login_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn proposal(created_by: Uuid, client: Option<Uuid>) -> Proposal {
    let now = Utc::now();
    Proposal {
        id: Uuid::new_v4(),
        project_name: format!("IT {}", Uuid::new_v4()),
        client_name: "Integration Client".into(),
        phase: ProjectPhase::Exploratory,
        status: ProposalStatus::Draft,
        content: "<p>scope</p>".into(),
        requirements: Some(serde_json::json!({ "scope": "all" })),
        created_by,
        assigned_to: None,
        client_user_id: client,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn test_email_uniqueness_is_case_insensitive() {
    let (stores, _) = stores().await;
    let mut u = user(Role::Client);
    stores.users.insert_user(&u).await.unwrap();

    let found = stores
        .users
        .find_user_by_email(&u.email.to_uppercase())
        .await
        .unwrap();
    assert_eq!(found.map(|f| f.id), Some(u.id));

    u.id = Uuid::new_v4();
    u.email = u.email.to_uppercase();
    let err = stores.users.insert_user(&u).await.unwrap_err();
    assert_eq!(err.code(), "conflict");
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn test_proposal_write_is_atomic_with_audit() {
    let (stores, _) = stores().await;
    let pm = user(Role::ProjectManager);
    stores.users.insert_user(&pm).await.unwrap();

    let p = proposal(pm.id, None);
    let version = ProposalVersion {
        id: Uuid::new_v4(),
        proposal_id: p.id,
        version_number: 1,
        content: p.content.clone(),
        change_summary: "Initial version".into(),
        created_by: pm.id,
        created_at: p.created_at,
    };
    let tracker = ProjectTracker::new(p.id, p.phase, p.created_at);
    let audit = [AuditLogEntry::proposal(
        pm.id,
        "proposal.created",
        p.id,
        serde_json::json!({}),
    )];
    stores
        .proposals
        .save_proposal(ProposalWrite {
            proposal: &p,
            expected_status: None,
            version: Some(&version),
            tracker: Some(&tracker),
            audit: &audit,
        })
        .await
        .unwrap();

    let loaded = stores.proposals.get_proposal(p.id).await.unwrap().unwrap();
    assert_eq!(loaded.content, p.content);
    assert_eq!(loaded.status, ProposalStatus::Draft);

    // A duplicate version number rolls the whole write back.
    let mut renamed = loaded.clone();
    renamed.project_name = "Should not persist".into();
    let rename_audit = [AuditLogEntry::proposal(
        pm.id,
        "proposal.updated",
        p.id,
        serde_json::json!({}),
    )];
    let err = stores
        .proposals
        .save_proposal(ProposalWrite {
            proposal: &renamed,
            expected_status: Some(ProposalStatus::Draft),
            version: Some(&version),
            tracker: None,
            audit: &rename_audit,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "conflict");
    let after = stores.proposals.get_proposal(p.id).await.unwrap().unwrap();
    assert_eq!(after.project_name, p.project_name);

    let trail = stores
        .audit
        .list_for_target(AuditTarget::Proposal, p.id)
        .await
        .unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(stores.proposals.latest_version_number(p.id).await.unwrap(), 1);
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn test_client_scope_filters_in_sql() {
    let (stores, _) = stores().await;
    let pm = user(Role::ProjectManager);
    let client = user(Role::Client);
    let other = user(Role::Client);
    for u in [&pm, &client, &other] {
        stores.users.insert_user(u).await.unwrap();
    }

    let mut mine = proposal(pm.id, Some(client.id));
    mine.status = ProposalStatus::Sent;
    let mut theirs = proposal(pm.id, Some(other.id));
    theirs.status = ProposalStatus::Sent;
    for p in [&mine, &theirs] {
        let audit = [AuditLogEntry::proposal(pm.id, "proposal.created", p.id, serde_json::json!({}))];
        stores
            .proposals
            .save_proposal(ProposalWrite {
                proposal: p,
                expected_status: None,
                version: None,
                tracker: None,
                audit: &audit,
            })
            .await
            .unwrap();
    }

    let filter = ProposalFilter {
        statuses: ProposalStatus::CLIENT_VISIBLE.to_vec(),
        client_scope: Some(ClientScope {
            client_id: client.id,
            shared_ids: vec![],
        }),
        ..ProposalFilter::default()
    };
    let visible = stores.proposals.list_proposals(&filter).await.unwrap();
    assert!(visible.iter().any(|p| p.id == mine.id));
    assert!(visible.iter().all(|p| p.id != theirs.id));
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn test_share_revoke_is_idempotent() {
    let (stores, _) = stores().await;
    let pm = user(Role::ProjectManager);
    stores.users.insert_user(&pm).await.unwrap();
    let p = proposal(pm.id, None);
    let audit = [AuditLogEntry::proposal(pm.id, "proposal.created", p.id, serde_json::json!({}))];
    stores
        .proposals
        .save_proposal(ProposalWrite {
            proposal: &p,
            expected_status: None,
            version: None,
            tracker: None,
            audit: &audit,
        })
        .await
        .unwrap();

    let now = Utc::now();
    let share = ProposalShare {
        id: Uuid::new_v4(),
        proposal_id: p.id,
        share_token: portal_core::tokens::generate_opaque_token(),
        recipient_user_id: None,
        created_by: pm.id,
        expires_at: Some(now + Duration::days(7)),
        revoked_at: None,
        access_count: 0,
        last_accessed_at: None,
        created_at: now,
    };
    let shared = AuditLogEntry::proposal(pm.id, "proposal.shared", p.id, serde_json::json!({}));
    stores.shares.insert_share(&share, &shared).await.unwrap();

    let first = now + Duration::minutes(1);
    stores
        .shares
        .revoke_share(share.id, first, &revoke_audit(pm.id, p.id))
        .await
        .unwrap();
    stores
        .shares
        .revoke_share(share.id, first + Duration::minutes(5), &revoke_audit(pm.id, p.id))
        .await
        .unwrap();

    let loaded = stores.shares.get_share(share.id).await.unwrap().unwrap();
    assert_eq!(
        loaded.revoked_at.map(|t| t.timestamp()),
        Some(first.timestamp())
    );
}

fn revoke_audit(actor: Uuid, proposal_id: Uuid) -> AuditLogEntry {
    AuditLogEntry::proposal(actor, "proposal.share_revoked", proposal_id, serde_json::json!({}))
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn test_audit_log_rejects_update() {
    let (stores, pool) = stores().await;
    let entry = AuditLogEntry::new(None, "user.created", AuditTarget::User, Uuid::new_v4(), serde_json::json!({}));
    stores.audit.append(&entry).await.unwrap();

    let result = sqlx::query("UPDATE portal.audit_log SET action = 'tampered' WHERE id = $1")
        .bind(entry.id)
        .execute(&pool)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
#[ignore] // requires DATABASE_URL
async fn test_stale_status_update_is_refused() {
    let (stores, _) = stores().await;
    let pm = user(Role::ProjectManager);
    stores.users.insert_user(&pm).await.unwrap();
    let mut p = proposal(pm.id, None);
    p.status = ProposalStatus::Sent;
    let created = [AuditLogEntry::proposal(pm.id, "proposal.created", p.id, serde_json::json!({}))];
    stores
        .proposals
        .save_proposal(ProposalWrite {
            proposal: &p,
            expected_status: None,
            version: None,
            tracker: None,
            audit: &created,
        })
        .await
        .unwrap();

    let mut accepted = p.clone();
    accepted.status = ProposalStatus::Accepted;
    let accept_audit = [AuditLogEntry::proposal(pm.id, "proposal.status_changed", p.id, serde_json::json!({}))];
    stores
        .proposals
        .save_proposal(ProposalWrite {
            proposal: &accepted,
            expected_status: Some(ProposalStatus::Sent),
            version: None,
            tracker: None,
            audit: &accept_audit,
        })
        .await
        .unwrap();

    // A writer that read the row while it was still sent must not win.
    let mut stale = p.clone();
    stale.content = "edited after acceptance".into();
    let stale_audit = [AuditLogEntry::proposal(pm.id, "proposal.updated", p.id, serde_json::json!({}))];
    let err = stores
        .proposals
        .save_proposal(ProposalWrite {
            proposal: &stale,
            expected_status: Some(ProposalStatus::Sent),
            version: None,
            tracker: None,
            audit: &stale_audit,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "conflict");

    let stored = stores.proposals.get_proposal(p.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ProposalStatus::Accepted);
    assert_eq!(stored.content, p.content);
    let trail = stores
        .audit
        .list_for_target(AuditTarget::Proposal, p.id)
        .await
        .unwrap();
    assert_eq!(trail.len(), 2);

    // A second insert of the same id is a conflict, not an overwrite.
    let again = [AuditLogEntry::proposal(pm.id, "proposal.created", p.id, serde_json::json!({}))];
    let err = stores
        .proposals
        .save_proposal(ProposalWrite {
            proposal: &p,
            expected_status: None,
            version: None,
            tracker: None,
            audit: &again,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "conflict");
}

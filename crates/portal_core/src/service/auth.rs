//! Registration, login, token refresh and password changes.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Portal, Result};
use crate::error::PortalError;
use crate::password::{hash_password, validate_strength, verify_password};
use crate::principal::Principal;
use crate::tokens::{generate_opaque_token, hash_token};
use crate::types::*;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));

const MAX_NAME_LEN: usize = 100;
const DEFAULT_TIMEZONE: &str = "UTC";

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserView,
}

/// Registration payload. `role` and `status` are honoured only on the
/// admin create path; public registration always makes an active client.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub status: Option<UserStatus>,
}

pub(super) fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if !EMAIL_RE.is_match(&email) {
        return Err(PortalError::Validation(format!("invalid email address: {email}")));
    }
    Ok(email)
}

pub(super) fn validate_name(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() || value.chars().count() > MAX_NAME_LEN {
        return Err(PortalError::Validation(format!(
            "{field} must be between 1 and {MAX_NAME_LEN} characters"
        )));
    }
    Ok(value.to_string())
}

impl Portal {
    /// Build and store a user row. Password strength is checked here, so
    /// seeding goes through [`crate::seeds`] instead.
    pub(super) async fn create_user_record(
        &self,
        req: NewUser,
        role: Role,
        status: UserStatus,
    ) -> Result<User> {
        let email = normalize_email(&req.email)?;
        validate_strength(&req.password)?;
        let first_name = validate_name("first_name", &req.first_name)?;
        let last_name = validate_name("last_name", &req.last_name)?;
        let password_hash = hash_password(&req.password, self.settings.auth.bcrypt_cost).await?;

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email,
            password_hash,
            first_name,
            last_name,
            phone_number: req.phone_number,
            company: req.company,
            bio: None,
            timezone: req.timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            role,
            status,
            is_verified: false,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        self.stores.users.insert_user(&user).await?;
        Ok(user)
    }

    /// Public sign-up. Always creates an active client and logs them in.
    pub async fn register(&self, req: NewUser) -> Result<AuthSession> {
        if req.role.is_some_and(|r| r != Role::Client) {
            return Err(PortalError::PermissionDenied(
                "self-registration is limited to client accounts".into(),
            ));
        }
        let user = self
            .create_user_record(req, Role::Client, UserStatus::Active)
            .await?;
        tracing::info!(user_id = %user.id, email = %user.email, "user registered");
        self.issue_session(&user, Utc::now()).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession> {
        let email = email.trim().to_lowercase();
        let Some(mut user) = self.stores.users.find_user_by_email(&email).await? else {
            tracing::warn!(email = %email, "login for unknown email");
            return Err(PortalError::InvalidCredentials);
        };

        let now = Utc::now();
        if let Some(until) = user.locked_until.filter(|_| user.is_locked(now)) {
            return Err(PortalError::AccountLocked(until));
        }

        if !verify_password(password, &user.password_hash).await? {
            let policy = &self.settings.auth;
            user.failed_login_attempts += 1;
            user.updated_at = now;
            let locked = user.failed_login_attempts >= policy.max_failed_attempts;
            if locked {
                let until = now + policy.lockout;
                user.locked_until = Some(until);
                user.failed_login_attempts = 0;
                tracing::warn!(user_id = %user.id, until = %until, "account locked after failed logins");
            }
            self.stores
                .users
                .record_login_state(user.id, &user.login_state())
                .await?;
            return Err(match user.locked_until.filter(|_| locked) {
                Some(until) => PortalError::AccountLocked(until),
                None => PortalError::InvalidCredentials,
            });
        }

        if !user.status.can_authenticate() {
            return Err(PortalError::AccountDisabled(user.status.to_string()));
        }

        user.failed_login_attempts = 0;
        user.locked_until = None;
        user.last_login_at = Some(now);
        user.updated_at = now;
        self.stores
            .users
            .record_login_state(user.id, &user.login_state())
            .await?;
        tracing::info!(user_id = %user.id, role = %user.role, "login succeeded");
        self.issue_session(&user, now).await
    }

    /// Rotate a refresh token. Presenting an already-revoked token is
    /// treated as theft: every session of that user is revoked.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSession> {
        let now = Utc::now();
        let record = self
            .stores
            .tokens
            .find_refresh_token(&hash_token(refresh_token))
            .await?
            .ok_or_else(|| PortalError::InvalidToken("unknown refresh token".into()))?;

        if record.revoked_at.is_some() {
            let revoked = self
                .stores
                .tokens
                .revoke_all_for_user(record.user_id, now)
                .await?;
            tracing::warn!(user_id = %record.user_id, revoked, "refresh token reuse detected");
            return Err(PortalError::InvalidToken("refresh token has been revoked".into()));
        }
        if record.expires_at <= now {
            return Err(PortalError::InvalidToken("refresh token has expired".into()));
        }

        let user = self
            .stores
            .users
            .get_user(record.user_id)
            .await?
            .ok_or_else(|| PortalError::InvalidToken("token subject no longer exists".into()))?;
        if !user.status.can_authenticate() {
            self.stores.tokens.revoke_all_for_user(user.id, now).await?;
            return Err(PortalError::InvalidToken(format!("account is {}", user.status)));
        }

        self.stores.tokens.revoke_refresh_token(record.id, now).await?;
        self.issue_session(&user, now).await
    }

    /// Revoke one refresh token. Unknown tokens are ignored.
    pub async fn logout(&self, refresh_token: &str) -> Result<()> {
        let hash = hash_token(refresh_token);
        if let Some(record) = self.stores.tokens.find_refresh_token(&hash).await? {
            self.stores
                .tokens
                .revoke_refresh_token(record.id, Utc::now())
                .await?;
            tracing::info!(user_id = %record.user_id, "logged out");
        }
        Ok(())
    }

    /// Revoke every refresh token of the caller. Returns how many were live.
    pub async fn logout_all(&self, principal: &Principal) -> Result<u64> {
        let revoked = self
            .stores
            .tokens
            .revoke_all_for_user(principal.user_id, Utc::now())
            .await?;
        tracing::info!(user_id = %principal.user_id, revoked, "logged out of all sessions");
        Ok(revoked)
    }

    /// Re-check a token's subject against the store. Accounts that can no
    /// longer sign in are refused, and the stored role replaces the claim.
    pub async fn authenticate(&self, claimed: &Principal) -> Result<Principal> {
        let Some(user) = self.stores.users.get_user(claimed.user_id).await? else {
            return Err(PortalError::InvalidToken("token subject no longer exists".into()));
        };
        if !user.status.can_authenticate() {
            return Err(PortalError::InvalidToken(format!("account is {}", user.status)));
        }
        if user.role != claimed.role {
            tracing::debug!(user_id = %user.id, claimed = %claimed.role, stored = %user.role, "role changed since token issue");
        }
        Ok(Principal::for_user(&user))
    }

    pub async fn current_user(&self, principal: &Principal) -> Result<UserView> {
        let user = self.load_user(principal.user_id).await?;
        Ok(UserView::from(&user))
    }

    /// Change the caller's password and end all their sessions.
    pub async fn change_password(
        &self,
        principal: &Principal,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let mut user = self.load_user(principal.user_id).await?;
        if !verify_password(current_password, &user.password_hash).await? {
            return Err(PortalError::InvalidCredentials);
        }
        if current_password == new_password {
            return Err(PortalError::Validation(
                "new password must differ from the current one".into(),
            ));
        }
        validate_strength(new_password)?;

        let now = Utc::now();
        user.password_hash = hash_password(new_password, self.settings.auth.bcrypt_cost).await?;
        user.updated_at = now;
        self.stores.users.update_user(&user).await?;
        self.stores.tokens.revoke_all_for_user(user.id, now).await?;
        tracing::info!(user_id = %user.id, "password changed");
        Ok(())
    }

    async fn issue_session(&self, user: &User, now: DateTime<Utc>) -> Result<AuthSession> {
        let access = self.issuer.issue(user, now)?;
        let refresh_token = generate_opaque_token();
        let record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: hash_token(&refresh_token),
            expires_at: now + self.settings.auth.refresh_ttl,
            revoked_at: None,
            created_at: now,
        };
        self.stores.tokens.insert_refresh_token(&record).await?;
        Ok(AuthSession {
            tokens: TokenPair {
                access_token: access.token,
                refresh_token,
                token_type: "bearer",
                expires_in: self.issuer.ttl_seconds(),
                refresh_expires_at: record.expires_at,
            },
            user: UserView::from(user),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    fn signup(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password: PASSWORD.into(),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            phone_number: None,
            company: Some("Acme".into()),
            timezone: None,
            role: None,
            status: None,
        }
    }

    #[tokio::test]
    async fn register_creates_active_client() {
        let portal = portal();
        let session = portal.register(signup("Jane@Example.com")).await.unwrap();
        assert_eq!(session.user.role, Role::Client);
        assert_eq!(session.user.status, UserStatus::Active);
        assert_eq!(session.user.email, "jane@example.com");
        assert_eq!(session.tokens.token_type, "bearer");
        assert_eq!(session.tokens.expires_in, 1800);
    }

    #[tokio::test]
    async fn register_rejects_staff_role_and_duplicates() {
        let portal = portal();
        let mut req = signup("pm@example.com");
        req.role = Some(Role::Admin);
        assert!(matches!(
            portal.register(req).await,
            Err(PortalError::PermissionDenied(_))
        ));

        portal.register(signup("dup@example.com")).await.unwrap();
        assert!(matches!(
            portal.register(signup("DUP@example.com")).await,
            Err(PortalError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn register_rejects_weak_password_and_bad_email() {
        let portal = portal();
        let mut weak = signup("weak@example.com");
        weak.password = "short".into();
        assert!(matches!(
            portal.register(weak).await,
            Err(PortalError::Validation(_))
        ));
        assert!(matches!(
            portal.register(signup("not-an-email")).await,
            Err(PortalError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn login_success_resets_failures() {
        let portal = portal();
        user(&portal, "a@example.com", Role::Admin).await;
        assert!(matches!(
            portal.login("a@example.com", "wrong").await,
            Err(PortalError::InvalidCredentials)
        ));
        let session = portal.login("A@example.com", PASSWORD).await.unwrap();
        assert_eq!(session.user.role, Role::Admin);

        let stored = portal
            .stores
            .users
            .find_user_by_email("a@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.failed_login_attempts, 0);
        assert!(stored.last_login_at.is_some());
    }

    #[tokio::test]
    async fn repeated_failures_lock_the_account() {
        let portal = portal();
        user(&portal, "c@example.com", Role::Client).await;
        for _ in 0..4 {
            assert!(matches!(
                portal.login("c@example.com", "wrong").await,
                Err(PortalError::InvalidCredentials)
            ));
        }
        assert!(matches!(
            portal.login("c@example.com", "wrong").await,
            Err(PortalError::AccountLocked(_))
        ));
        // The correct password does not bypass the lock.
        assert!(matches!(
            portal.login("c@example.com", PASSWORD).await,
            Err(PortalError::AccountLocked(_))
        ));
    }

    #[tokio::test]
    async fn suspended_user_cannot_login() {
        let portal = portal();
        let p = user(&portal, "s@example.com", Role::Client).await;
        let mut u = portal.load_user(p.user_id).await.unwrap();
        u.status = UserStatus::Suspended;
        portal.stores.users.update_user(&u).await.unwrap();
        assert!(matches!(
            portal.login("s@example.com", PASSWORD).await,
            Err(PortalError::AccountDisabled(_))
        ));
    }

    #[tokio::test]
    async fn authenticate_follows_the_stored_account() {
        let portal = portal();
        let admin = user(&portal, "root@example.com", Role::Admin).await;
        let pm = user(&portal, "lead@example.com", Role::ProjectManager).await;
        assert_eq!(portal.authenticate(&pm).await.unwrap(), pm);

        portal.set_user_role(&admin, pm.user_id, Role::Client).await.unwrap();
        let demoted = portal.authenticate(&pm).await.unwrap();
        assert_eq!(demoted.role, Role::Client);

        portal
            .set_user_status(&admin, pm.user_id, UserStatus::Suspended)
            .await
            .unwrap();
        assert!(matches!(
            portal.authenticate(&pm).await,
            Err(PortalError::InvalidToken(_))
        ));

        let mut ghost = pm.clone();
        ghost.user_id = Uuid::new_v4();
        assert!(matches!(
            portal.authenticate(&ghost).await,
            Err(PortalError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn refresh_rotates_and_detects_reuse() {
        let portal = portal();
        user(&portal, "r@example.com", Role::Client).await;
        let first = portal.login("r@example.com", PASSWORD).await.unwrap();
        let second = portal.refresh(&first.tokens.refresh_token).await.unwrap();
        assert_ne!(first.tokens.refresh_token, second.tokens.refresh_token);

        // Replaying the rotated-out token revokes the whole family.
        assert!(matches!(
            portal.refresh(&first.tokens.refresh_token).await,
            Err(PortalError::InvalidToken(_))
        ));
        assert!(matches!(
            portal.refresh(&second.tokens.refresh_token).await,
            Err(PortalError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn logout_revokes_refresh_token() {
        let portal = portal();
        user(&portal, "l@example.com", Role::Client).await;
        let session = portal.login("l@example.com", PASSWORD).await.unwrap();
        portal.logout(&session.tokens.refresh_token).await.unwrap();
        assert!(portal.refresh(&session.tokens.refresh_token).await.is_err());
        portal.logout("never-issued").await.unwrap();
    }

    #[tokio::test]
    async fn logout_all_counts_live_sessions() {
        let portal = portal();
        let p = user(&portal, "m@example.com", Role::ProjectManager).await;
        portal.login("m@example.com", PASSWORD).await.unwrap();
        portal.login("m@example.com", PASSWORD).await.unwrap();
        assert_eq!(portal.logout_all(&p).await.unwrap(), 2);
        assert_eq!(portal.logout_all(&p).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn change_password_checks_current_and_ends_sessions() {
        let portal = portal();
        let p = user(&portal, "pw@example.com", Role::Client).await;
        let session = portal.login("pw@example.com", PASSWORD).await.unwrap();

        assert!(matches!(
            portal.change_password(&p, "wrong", "N3w!Secret99").await,
            Err(PortalError::InvalidCredentials)
        ));
        portal
            .change_password(&p, PASSWORD, "N3w!Secret99")
            .await
            .unwrap();
        assert!(portal.refresh(&session.tokens.refresh_token).await.is_err());
        assert!(portal.login("pw@example.com", "N3w!Secret99").await.is_ok());
    }
}

//! Profile management and admin user administration.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::auth::{validate_name, NewUser};
use super::{Portal, Result};
use crate::access;
use crate::error::PortalError;
use crate::principal::Principal;
use crate::types::*;

const MAX_BIO_LEN: usize = 2000;

/// Partial profile update; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub company: Option<String>,
    pub bio: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserQuery {
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleCount {
    pub role: Role,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusCount {
    pub status: UserStatus,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserStats {
    pub total: i64,
    pub by_role: Vec<RoleCount>,
    pub by_status: Vec<StatusCount>,
}

fn user_audit(actor: &Principal, action: &str, target: Uuid, detail: serde_json::Value) -> AuditLogEntry {
    AuditLogEntry::new(Some(actor.user_id), action, AuditTarget::User, target, detail)
}

impl Portal {
    async fn manageable_user(&self, principal: &Principal, id: Uuid) -> Result<User> {
        let user = self.load_user(id).await?;
        if !access::can_manage_user(principal, &user) {
            return Err(PortalError::PermissionDenied(
                "you may not manage this user".into(),
            ));
        }
        Ok(user)
    }

    /// Admin-side account creation. The new account is verified.
    pub async fn create_user(&self, principal: &Principal, req: NewUser) -> Result<UserView> {
        principal.require_admin()?;
        let role = req.role.unwrap_or(Role::Client);
        let status = req.status.unwrap_or(UserStatus::Active);
        let mut user = self.create_user_record(req, role, status).await?;
        user.is_verified = true;
        self.stores.users.update_user(&user).await?;
        self.stores
            .audit
            .append(&user_audit(
                principal,
                "user.created",
                user.id,
                json!({ "role": role, "status": status }),
            ))
            .await?;
        tracing::info!(user_id = %user.id, role = %role, by = %principal.user_id, "user created");
        Ok(UserView::from(&user))
    }

    pub async fn list_users(&self, principal: &Principal, query: UserQuery) -> Result<Paged<UserView>> {
        principal.require_staff()?;
        let (limit, offset) = clamp_page(query.limit, query.offset);
        let mut filter = UserFilter {
            role: query.role,
            status: query.status,
            search: query.search,
            limit: Some(limit),
            offset: Some(offset),
        };
        // Project managers administer clients only.
        if principal.role == Role::ProjectManager {
            filter.role = Some(Role::Client);
        }
        let total = self.stores.users.count_users(&filter).await?;
        let items = self
            .stores
            .users
            .list_users(&filter)
            .await?
            .iter()
            .map(UserView::from)
            .collect();
        Ok(Paged {
            items,
            total,
            limit,
            offset,
        })
    }

    /// Active staff members, for assignment pickers and team views.
    pub async fn list_staff(&self, principal: &Principal) -> Result<Vec<UserView>> {
        principal.require_staff()?;
        let mut staff = Vec::new();
        for role in [Role::ProjectManager, Role::Admin] {
            let filter = UserFilter {
                role: Some(role),
                status: Some(UserStatus::Active),
                ..UserFilter::default()
            };
            staff.extend(self.stores.users.list_users(&filter).await?.iter().map(UserView::from));
        }
        Ok(staff)
    }

    pub async fn get_user(&self, principal: &Principal, id: Uuid) -> Result<UserView> {
        if principal.user_id != id {
            principal.require_staff()?;
        }
        let user = self.manageable_user(principal, id).await?;
        Ok(UserView::from(&user))
    }

    pub async fn update_profile(&self, principal: &Principal, update: ProfileUpdate) -> Result<UserView> {
        self.update_user(principal, principal.user_id, update).await
    }

    pub async fn update_user(
        &self,
        principal: &Principal,
        id: Uuid,
        update: ProfileUpdate,
    ) -> Result<UserView> {
        let mut user = self.manageable_user(principal, id).await?;
        if let Some(v) = update.first_name {
            user.first_name = validate_name("first_name", &v)?;
        }
        if let Some(v) = update.last_name {
            user.last_name = validate_name("last_name", &v)?;
        }
        if let Some(v) = update.bio {
            if v.chars().count() > MAX_BIO_LEN {
                return Err(PortalError::Validation(format!(
                    "bio must be at most {MAX_BIO_LEN} characters"
                )));
            }
            user.bio = Some(v).filter(|b| !b.trim().is_empty());
        }
        if let Some(v) = update.phone_number {
            user.phone_number = Some(v).filter(|p| !p.trim().is_empty());
        }
        if let Some(v) = update.company {
            user.company = Some(v).filter(|c| !c.trim().is_empty());
        }
        if let Some(v) = update.timezone.filter(|t| !t.trim().is_empty()) {
            user.timezone = v;
        }
        user.updated_at = Utc::now();
        self.stores.users.update_user(&user).await?;
        Ok(UserView::from(&user))
    }

    pub async fn set_user_role(&self, principal: &Principal, id: Uuid, role: Role) -> Result<UserView> {
        principal.require_admin()?;
        if principal.user_id == id {
            return Err(PortalError::Validation("you cannot change your own role".into()));
        }
        let mut user = self.manageable_user(principal, id).await?;
        let previous = user.role;
        user.role = role;
        user.updated_at = Utc::now();
        self.stores.users.update_user(&user).await?;
        self.stores
            .audit
            .append(&user_audit(
                principal,
                "user.role_changed",
                id,
                json!({ "from": previous, "to": role }),
            ))
            .await?;
        tracing::info!(user_id = %id, from = %previous, to = %role, "user role changed");
        Ok(UserView::from(&user))
    }

    /// Any status other than active also ends the user's sessions.
    pub async fn set_user_status(
        &self,
        principal: &Principal,
        id: Uuid,
        status: UserStatus,
    ) -> Result<UserView> {
        principal.require_admin()?;
        if principal.user_id == id {
            return Err(PortalError::Validation("you cannot change your own status".into()));
        }
        let mut user = self.manageable_user(principal, id).await?;
        let previous = user.status;
        let now = Utc::now();
        user.status = status;
        user.updated_at = now;
        if status == UserStatus::Active {
            user.failed_login_attempts = 0;
            user.locked_until = None;
        }
        self.stores.users.update_user(&user).await?;
        if status != UserStatus::Active {
            self.stores.tokens.revoke_all_for_user(id, now).await?;
        }
        self.stores
            .audit
            .append(&user_audit(
                principal,
                "user.status_changed",
                id,
                json!({ "from": previous, "to": status }),
            ))
            .await?;
        tracing::info!(user_id = %id, from = %previous, to = %status, "user status changed");
        Ok(UserView::from(&user))
    }

    pub async fn deactivate_user(&self, principal: &Principal, id: Uuid) -> Result<UserView> {
        self.set_user_status(principal, id, UserStatus::Inactive).await
    }

    /// Revoke every session of another user.
    pub async fn force_logout(&self, principal: &Principal, id: Uuid) -> Result<u64> {
        principal.require_admin()?;
        self.manageable_user(principal, id).await?;
        let revoked = self
            .stores
            .tokens
            .revoke_all_for_user(id, Utc::now())
            .await?;
        self.stores
            .audit
            .append(&user_audit(principal, "user.force_logout", id, json!({ "revoked": revoked })))
            .await?;
        Ok(revoked)
    }

    pub async fn user_stats(&self, principal: &Principal) -> Result<UserStats> {
        principal.require_admin()?;
        let users = &self.stores.users;
        let total = users.count_users(&UserFilter::default()).await?;
        let mut by_role = Vec::new();
        for role in Role::ALL {
            let filter = UserFilter {
                role: Some(role),
                ..UserFilter::default()
            };
            by_role.push(RoleCount {
                role,
                count: users.count_users(&filter).await?,
            });
        }
        let mut by_status = Vec::new();
        for status in UserStatus::ALL {
            let filter = UserFilter {
                status: Some(status),
                ..UserFilter::default()
            };
            by_status.push(StatusCount {
                status,
                count: users.count_users(&filter).await?,
            });
        }
        Ok(UserStats {
            total,
            by_role,
            by_status,
        })
    }

    /// Drop expired and revoked refresh tokens.
    pub async fn purge_refresh_tokens(&self, principal: &Principal) -> Result<u64> {
        principal.require_admin()?;
        let removed = self.stores.tokens.purge_refresh_tokens(Utc::now()).await?;
        tracing::info!(removed, "refresh tokens purged");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            email: email.into(),
            password: PASSWORD.into(),
            first_name: "New".into(),
            last_name: "User".into(),
            phone_number: None,
            company: None,
            timezone: Some("Europe/London".into()),
            role: Some(role),
            status: None,
        }
    }

    #[tokio::test]
    async fn only_admins_create_users() {
        let portal = portal();
        let admin = user(&portal, "admin@example.com", Role::Admin).await;
        let pm = user(&portal, "pm@example.com", Role::ProjectManager).await;

        let created = portal
            .create_user(&admin, new_user("staff@example.com", Role::ProjectManager))
            .await
            .unwrap();
        assert_eq!(created.role, Role::ProjectManager);
        assert!(created.is_verified);
        assert_eq!(created.timezone, "Europe/London");

        assert!(matches!(
            portal.create_user(&pm, new_user("x@example.com", Role::Client)).await,
            Err(PortalError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn project_managers_list_only_clients() {
        let portal = portal();
        let pm = user(&portal, "pm@example.com", Role::ProjectManager).await;
        user(&portal, "admin@example.com", Role::Admin).await;
        user(&portal, "c1@example.com", Role::Client).await;
        user(&portal, "c2@example.com", Role::Client).await;

        let page = portal.list_users(&pm, UserQuery::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert!(page.items.iter().all(|u| u.role == Role::Client));

        let client = user(&portal, "c3@example.com", Role::Client).await;
        assert!(portal.list_users(&client, UserQuery::default()).await.is_err());
    }

    #[tokio::test]
    async fn profile_update_trims_empty_optionals() {
        let portal = portal();
        let me = user(&portal, "me@example.com", Role::Client).await;
        let view = portal
            .update_profile(
                &me,
                ProfileUpdate {
                    first_name: Some("  Ada ".into()),
                    company: Some("".into()),
                    bio: Some("Builds things".into()),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(view.first_name, "Ada");
        assert_eq!(view.company, None);
        assert_eq!(view.bio.as_deref(), Some("Builds things"));

        assert!(matches!(
            portal
                .update_profile(
                    &me,
                    ProfileUpdate {
                        last_name: Some(" ".into()),
                        ..ProfileUpdate::default()
                    }
                )
                .await,
            Err(PortalError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn clients_cannot_read_other_users() {
        let portal = portal();
        let c1 = user(&portal, "c1@example.com", Role::Client).await;
        let c2 = user(&portal, "c2@example.com", Role::Client).await;
        assert!(portal.get_user(&c1, c1.user_id).await.is_ok());
        assert!(matches!(
            portal.get_user(&c1, c2.user_id).await,
            Err(PortalError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn suspending_revokes_sessions_and_blocks_login() {
        let portal = portal();
        let admin = user(&portal, "admin@example.com", Role::Admin).await;
        let client = user(&portal, "c@example.com", Role::Client).await;
        let session = portal.login("c@example.com", PASSWORD).await.unwrap();

        let view = portal
            .set_user_status(&admin, client.user_id, UserStatus::Suspended)
            .await
            .unwrap();
        assert_eq!(view.status, UserStatus::Suspended);
        assert!(portal.refresh(&session.tokens.refresh_token).await.is_err());
        assert!(matches!(
            portal.login("c@example.com", PASSWORD).await,
            Err(PortalError::AccountDisabled(_))
        ));

        let audit = portal
            .stores
            .audit
            .list_for_target(AuditTarget::User, client.user_id)
            .await
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "user.status_changed");
    }

    #[tokio::test]
    async fn admins_cannot_change_themselves_or_other_admins() {
        let portal = portal();
        let admin = user(&portal, "admin@example.com", Role::Admin).await;
        let other = user(&portal, "admin2@example.com", Role::Admin).await;
        assert!(matches!(
            portal.set_user_role(&admin, admin.user_id, Role::Client).await,
            Err(PortalError::Validation(_))
        ));
        assert!(matches!(
            portal.set_user_role(&admin, other.user_id, Role::Client).await,
            Err(PortalError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn stats_count_by_role_and_status() {
        let portal = portal();
        let admin = user(&portal, "admin@example.com", Role::Admin).await;
        user(&portal, "pm@example.com", Role::ProjectManager).await;
        user(&portal, "c@example.com", Role::Client).await;

        let stats = portal.user_stats(&admin).await.unwrap();
        assert_eq!(stats.total, 3);
        let clients = stats.by_role.iter().find(|r| r.role == Role::Client).unwrap();
        assert_eq!(clients.count, 1);
        let active = stats
            .by_status
            .iter()
            .find(|s| s.status == UserStatus::Active)
            .unwrap();
        assert_eq!(active.count, 3);
    }
}

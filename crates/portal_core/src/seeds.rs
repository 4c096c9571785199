//! Demo accounts for local development and the HTTP integration tests.
//!
//! Seeding bypasses the password strength check. `AdminPass123!` contains
//! `admin` and would otherwise be refused.

use chrono::Utc;
use uuid::Uuid;

use crate::error::PortalError;
use crate::password::hash_password;
use crate::ports::UserStore;
use crate::types::{Role, User, UserStatus};

#[derive(Debug, Clone, Copy)]
pub struct DemoUser {
    pub email: &'static str,
    pub password: &'static str,
    pub first_name: &'static str,
    pub last_name: &'static str,
    pub company: Option<&'static str>,
    pub role: Role,
    pub status: UserStatus,
}

pub fn demo_users() -> &'static [DemoUser] {
    const USERS: &[DemoUser] = &[
        DemoUser {
            email: "admin@jda-portal.com",
            password: "AdminPass123!",
            first_name: "System",
            last_name: "Administrator",
            company: Some("JDA Digital Agency"),
            role: Role::Admin,
            status: UserStatus::Active,
        },
        DemoUser {
            email: "pm@jda-portal.com",
            password: "ProjectManager123!",
            first_name: "Sarah",
            last_name: "Johnson",
            company: Some("JDA Digital Agency"),
            role: Role::ProjectManager,
            status: UserStatus::Active,
        },
        DemoUser {
            email: "pm2@jda-portal.com",
            password: "ProjectManager123!",
            first_name: "Michael",
            last_name: "Chen",
            company: Some("JDA Digital Agency"),
            role: Role::ProjectManager,
            status: UserStatus::Active,
        },
        DemoUser {
            email: "client1@testcompany.com",
            password: "ClientPass123!",
            first_name: "Emily",
            last_name: "Davis",
            company: Some("Test Company Inc."),
            role: Role::Client,
            status: UserStatus::Active,
        },
        DemoUser {
            email: "client2@smallbiz.com",
            password: "ClientPass123!",
            first_name: "Robert",
            last_name: "Wilson",
            company: Some("Small Business LLC"),
            role: Role::Client,
            status: UserStatus::Active,
        },
        DemoUser {
            email: "client3@startup.io",
            password: "ClientPass123!",
            first_name: "Lisa",
            last_name: "Anderson",
            company: Some("Startup.io"),
            role: Role::Client,
            status: UserStatus::Active,
        },
        DemoUser {
            email: "suspended@test.com",
            password: "TestPass123!",
            first_name: "Suspended",
            last_name: "User",
            company: None,
            role: Role::Client,
            status: UserStatus::Suspended,
        },
    ];
    USERS
}

/// Insert any demo user whose email is not yet registered. Idempotent;
/// returns how many were created.
pub async fn seed_demo_users(users: &dyn UserStore, bcrypt_cost: u32) -> Result<usize, PortalError> {
    let mut created = 0;
    for demo in demo_users() {
        if users.find_user_by_email(demo.email).await?.is_some() {
            continue;
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: demo.email.to_string(),
            password_hash: hash_password(demo.password, bcrypt_cost).await?,
            first_name: demo.first_name.to_string(),
            last_name: demo.last_name.to_string(),
            phone_number: None,
            company: demo.company.map(String::from),
            bio: None,
            timezone: "UTC".to_string(),
            role: demo.role,
            status: demo.status,
            is_verified: true,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        users.insert_user(&user).await?;
        created += 1;
    }
    if created > 0 {
        tracing::info!(created, "demo users seeded");
    }
    Ok(created)
}

//! Server configuration from environment variables.
//!
//! `.env` is loaded first when present. Every variable has a default except
//! `PORTAL_JWT_SECRET` outside development.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::Duration;
use portal_core::password::DEFAULT_BCRYPT_COST;
use portal_core::service::{AuthPolicy, PortalSettings};
use portal_core::upload::{UploadPolicy, DEFAULT_MAX_UPLOAD_BYTES};
use thiserror::Error;

const DEV_JWT_SECRET: &str = "dev-only-portal-secret-change-me";
const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be set when PORTAL_ENVIRONMENT is {environment}")]
    Missing {
        name: &'static str,
        environment: Environment,
    },

    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub environment: Environment,
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub database_pool_size: u32,
    pub jwt_secret: String,
    pub access_token_minutes: i64,
    pub refresh_token_minutes: i64,
    pub max_upload_bytes: u64,
    pub upload_dir: String,
    pub cors_origins: Vec<String>,
    pub public_base_url: String,
    pub max_failed_logins: i32,
    pub lockout_minutes: i64,
    pub bcrypt_cost: u32,
    pub seed_demo_users: bool,
}

/// Variable lookup, abstracted so parsing is testable without touching
/// the process environment.
type Lookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

fn parsed<T: FromStr>(lookup: &Lookup<'_>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value,
            reason: e.to_string(),
        }),
    }
}

fn positive<T: PartialOrd + Default>(name: &'static str, value: T, shown: String) -> Result<T, ConfigError> {
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: shown,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(&|name| vars.get(name).cloned())
    }

    fn from_lookup(lookup: &Lookup<'_>) -> Result<Self, ConfigError> {
        let environment: Environment =
            parsed(lookup, "PORTAL_ENVIRONMENT", Environment::Development)?;

        let jwt_secret = match lookup("PORTAL_JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None if environment == Environment::Development => DEV_JWT_SECRET.to_string(),
            None => {
                return Err(ConfigError::Missing {
                    name: "PORTAL_JWT_SECRET",
                    environment,
                })
            }
        };
        if environment != Environment::Development && jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "PORTAL_JWT_SECRET",
                value: "<redacted>".into(),
                reason: format!("must be at least {MIN_JWT_SECRET_LEN} bytes"),
            });
        }

        let access_token_minutes: i64 = parsed(lookup, "ACCESS_TOKEN_EXPIRE_MINUTES", 30)?;
        let refresh_token_minutes: i64 = parsed(lookup, "REFRESH_TOKEN_EXPIRE_MINUTES", 10_080)?;
        let max_upload_bytes: u64 = parsed(lookup, "PORTAL_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;
        let database_pool_size: u32 = parsed(lookup, "DATABASE_POOL_SIZE", 10)?;
        let max_failed_logins: i32 = parsed(lookup, "LOGIN_MAX_FAILED_ATTEMPTS", 5)?;
        let lockout_minutes: i64 = parsed(lookup, "LOGIN_LOCKOUT_MINUTES", 15)?;
        let bcrypt_cost: u32 = parsed(lookup, "BCRYPT_COST", DEFAULT_BCRYPT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                name: "BCRYPT_COST",
                value: bcrypt_cost.to_string(),
                reason: "must be between 4 and 31".into(),
            });
        }

        let cors_origins = lookup("PORTAL_CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://127.0.0.1:3000".into())
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();

        Ok(Self {
            bind_addr: lookup("PORTAL_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".into()),
            environment,
            database_url: lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()),
            database_pool_size: positive("DATABASE_POOL_SIZE", database_pool_size, database_pool_size.to_string())?,
            jwt_secret,
            access_token_minutes: positive(
                "ACCESS_TOKEN_EXPIRE_MINUTES",
                access_token_minutes,
                access_token_minutes.to_string(),
            )?,
            refresh_token_minutes: positive(
                "REFRESH_TOKEN_EXPIRE_MINUTES",
                refresh_token_minutes,
                refresh_token_minutes.to_string(),
            )?,
            max_upload_bytes: positive("PORTAL_MAX_UPLOAD_BYTES", max_upload_bytes, max_upload_bytes.to_string())?,
            upload_dir: lookup("PORTAL_UPLOAD_DIR").unwrap_or_else(|| "uploads".into()),
            cors_origins,
            public_base_url: lookup("PORTAL_PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000".into()),
            max_failed_logins: positive("LOGIN_MAX_FAILED_ATTEMPTS", max_failed_logins, max_failed_logins.to_string())?,
            lockout_minutes: positive("LOGIN_LOCKOUT_MINUTES", lockout_minutes, lockout_minutes.to_string())?,
            bcrypt_cost,
            seed_demo_users: parsed(lookup, "PORTAL_SEED_DEMO_USERS", false)?,
        })
    }

    pub fn portal_settings(&self) -> PortalSettings {
        PortalSettings {
            auth: AuthPolicy {
                refresh_ttl: Duration::minutes(self.refresh_token_minutes),
                max_failed_attempts: self.max_failed_logins,
                lockout: Duration::minutes(self.lockout_minutes),
                bcrypt_cost: self.bcrypt_cost,
            },
            upload: UploadPolicy {
                max_bytes: self.max_upload_bytes,
                ..UploadPolicy::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_in_development() {
        let cfg = ServerConfig::from_map(&HashMap::new()).unwrap();
        assert_eq!(cfg.environment, Environment::Development);
        assert_eq!(cfg.bind_addr, "0.0.0.0:8000");
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.access_token_minutes, 30);
        assert_eq!(cfg.refresh_token_minutes, 10_080);
        assert_eq!(cfg.max_upload_bytes, 52_428_800);
        assert_eq!(cfg.cors_origins.len(), 2);
        assert!(!cfg.seed_demo_users);

        let settings = cfg.portal_settings();
        assert_eq!(settings.auth.max_failed_attempts, 5);
        assert_eq!(settings.auth.lockout, Duration::minutes(15));
        assert_eq!(settings.auth.refresh_ttl, Duration::days(7));
    }

    #[test]
    fn production_requires_a_secret() {
        let err = ServerConfig::from_map(&vars(&[("PORTAL_ENVIRONMENT", "production")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: "PORTAL_JWT_SECRET", .. }));

        let err = ServerConfig::from_map(&vars(&[
            ("PORTAL_ENVIRONMENT", "production"),
            ("PORTAL_JWT_SECRET", "short"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORTAL_JWT_SECRET", .. }));
    }

    #[test]
    fn invalid_numbers_fail() {
        let err = ServerConfig::from_map(&vars(&[("ACCESS_TOKEN_EXPIRE_MINUTES", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ACCESS_TOKEN_EXPIRE_MINUTES", .. }));

        let err = ServerConfig::from_map(&vars(&[("LOGIN_LOCKOUT_MINUTES", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "LOGIN_LOCKOUT_MINUTES", .. }));

        let err = ServerConfig::from_map(&vars(&[("BCRYPT_COST", "3")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "BCRYPT_COST", .. }));
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = ServerConfig::from_map(&vars(&[
            ("DATABASE_URL", "postgres://localhost/portal"),
            ("PORTAL_CORS_ORIGINS", "https://portal.example.com, https://admin.example.com"),
            ("PORTAL_SEED_DEMO_USERS", "true"),
            ("PORTAL_MAX_UPLOAD_BYTES", "1024"),
        ]))
        .unwrap();
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/portal"));
        assert_eq!(
            cfg.cors_origins,
            vec!["https://portal.example.com", "https://admin.example.com"]
        );
        assert!(cfg.seed_demo_users);
        assert_eq!(cfg.portal_settings().upload.max_bytes, 1024);
    }
}

use uuid::Uuid;

use crate::error::PortalError;
use crate::types::{Role, User};

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// The authenticated caller, passed explicitly into every service call.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl Principal {
    /// Construct from validated access-token claims at the server boundary.
    /// The server middleware calls this; core logic never reads raw JWT tokens.
    pub fn from_access_claims(claims: &AccessClaims) -> Result<Self, PortalError> {
        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(PortalError::InvalidToken(format!(
                "expected {ACCESS_TOKEN_TYPE} token, got {}",
                claims.token_type
            )));
        }
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| PortalError::InvalidToken("malformed sub claim".into()))?;
        let role = Role::from_str(&claims.role)
            .ok_or_else(|| PortalError::InvalidToken(format!("unknown role {}", claims.role)))?;
        Ok(Self {
            user_id,
            email: claims.email.clone(),
            role,
        })
    }

    pub fn for_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    /// Membership check against the operation's allowed role set.
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), PortalError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(PortalError::PermissionDenied(format!(
                "role {} may not perform this operation",
                self.role
            )))
        }
    }

    /// Ordering check: client < project_manager < admin.
    pub fn require_at_least(&self, minimum: Role) -> Result<(), PortalError> {
        if self.role >= minimum {
            Ok(())
        } else {
            Err(PortalError::PermissionDenied(format!(
                "requires {minimum} or higher"
            )))
        }
    }

    pub fn require_admin(&self) -> Result<(), PortalError> {
        self.require_role(ADMIN_ONLY)
    }

    /// Staff may author proposals and drive the lifecycle.
    pub fn require_staff(&self) -> Result<(), PortalError> {
        self.require_at_least(Role::ProjectManager)
    }
}

pub const ACCESS_TOKEN_TYPE: &str = "access";

/// Access-token claims. Serialized by the issuer, deserialized by the
/// server JWT middleware.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub full_name: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

impl AccessClaims {
    pub fn for_user(user: &User, issued_at: i64, expires_at: i64) -> Self {
        Self {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role: user.role.as_str().to_string(),
            full_name: user.full_name(),
            iat: issued_at,
            exp: expires_at,
            token_type: ACCESS_TOKEN_TYPE.to_string(),
        }
    }
}

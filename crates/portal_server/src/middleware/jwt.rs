//! HS256 access tokens: issued through [`AccessTokenIssuer`], verified by
//! the [`jwt_auth`] middleware which inserts a [`Principal`] extension.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use portal_core::error::PortalError;
use portal_core::principal::{AccessClaims, Principal};
use portal_core::tokens::{AccessTokenIssuer, SignedAccessToken};
use portal_core::types::User;
use portal_core::Portal;

use crate::error::AppError;

#[derive(Clone)]
pub struct JwtConfig {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
}

impl JwtConfig {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self::new(secret, Duration::minutes(30))
    }

    pub fn new(secret: &[u8], access_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            access_ttl,
        }
    }

    /// Decode and validate a bearer token into its caller.
    pub fn verify(&self, token: &str) -> Result<Principal, PortalError> {
        let data = decode::<AccessClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| PortalError::InvalidToken(e.to_string()))?;
        Principal::from_access_claims(&data.claims)
    }
}

impl AccessTokenIssuer for JwtConfig {
    fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<SignedAccessToken, PortalError> {
        let expires_at = now + self.access_ttl;
        let claims = AccessClaims::for_user(user, now.timestamp(), expires_at.timestamp());
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| PortalError::Internal(e.into()))?;
        Ok(SignedAccessToken { token, expires_at })
    }

    fn ttl_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }
}

/// `Authorization: Bearer <token>` → token.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, PortalError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(PortalError::Unauthenticated)?
        .to_str()
        .map_err(|_| PortalError::InvalidToken("authorization header is not ASCII".into()))?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PortalError::InvalidToken("expected a Bearer token".into()))
}

/// Verify the bearer token, then resolve its subject through the user
/// store so suspensions and role changes apply to tokens already issued.
pub async fn jwt_auth(mut request: Request, next: Next) -> Response {
    let extensions = request.extensions();
    let (Some(config), Some(portal)) = (
        extensions.get::<JwtConfig>().cloned(),
        extensions.get::<Arc<Portal>>().cloned(),
    ) else {
        return AppError(PortalError::Internal(anyhow::anyhow!(
            "JwtConfig or Portal extension missing"
        )))
        .into_response();
    };
    let claimed = match bearer_token(request.headers()).and_then(|t| config.verify(t)) {
        Ok(p) => p,
        Err(e) => return AppError(e).into_response(),
    };
    let principal = match portal.authenticate(&claimed).await {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(user_id = %claimed.user_id, error = %e, "token subject refused");
            return AppError(e).into_response();
        }
    };
    request.extensions_mut().insert(principal);
    next.run(request).await
}

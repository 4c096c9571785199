//! Opaque tokens (refresh and share) and the access-token signing seam.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::PortalError;
use crate::types::User;

const OPAQUE_TOKEN_BYTES: usize = 32;

/// 32 random bytes, URL-safe base64 without padding.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Refresh tokens are stored and looked up by this digest only.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs access tokens for a user. Implemented at the server boundary so
/// core logic never touches JWT encoding.
pub trait AccessTokenIssuer: Send + Sync {
    fn issue(&self, user: &User, now: DateTime<Utc>) -> Result<SignedAccessToken, PortalError>;

    /// Lifetime in seconds, reported to clients as `expires_in`.
    fn ttl_seconds(&self) -> i64;
}

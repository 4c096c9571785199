//! Password strength policy and bcrypt hashing.

use anyhow::anyhow;

use crate::error::PortalError;

pub const MIN_LENGTH: usize = 8;
pub const MAX_LENGTH: usize = 128;
pub const DEFAULT_BCRYPT_COST: u32 = 12;

const SPECIAL_CHARS: &str = "!@#$%^&*(),.?\":{}|<>";
const COMMON_PATTERNS: &[&str] = &[
    "password", "123456", "qwerty", "admin", "user", "letmein", "welcome", "monkey", "dragon",
];

/// All rule violations for `password`, empty when it is acceptable.
pub fn strength_violations(password: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let len = password.chars().count();
    if len < MIN_LENGTH {
        errors.push(format!("must be at least {MIN_LENGTH} characters long"));
    }
    if len > MAX_LENGTH {
        errors.push(format!("must be at most {MAX_LENGTH} characters long"));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("must contain an uppercase letter".into());
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push("must contain a lowercase letter".into());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("must contain a digit".into());
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        errors.push("must contain a special character".into());
    }
    let lowered = password.to_lowercase();
    if let Some(pattern) = COMMON_PATTERNS.iter().find(|p| lowered.contains(*p)) {
        errors.push(format!("must not contain the common pattern '{pattern}'"));
    }
    errors
}

pub fn validate_strength(password: &str) -> Result<(), PortalError> {
    let errors = strength_violations(password);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(PortalError::Validation(format!(
            "password {}",
            errors.join("; ")
        )))
    }
}

/// Hash on the blocking pool.
pub async fn hash_password(password: &str, cost: u32) -> Result<String, PortalError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| anyhow!(e))?
        .map_err(|e| PortalError::Internal(anyhow!(e)))
}

/// A malformed stored hash verifies as false rather than erroring.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, PortalError> {
    let password = password.to_string();
    let hash = hash.to_string();
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| anyhow!(e))?;
    Ok(verified.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_passwords_are_strong() {
        assert!(validate_strength("AdminPass123!").is_err(), "contains 'admin'");
        assert!(validate_strength("ProjectManager123!").is_ok());
        assert!(validate_strength("ClientPass123!").is_ok());
    }

    #[test]
    fn weak_passwords_report_every_rule() {
        let errors = strength_violations("abc");
        assert!(errors.iter().any(|e| e.contains("at least 8")));
        assert!(errors.iter().any(|e| e.contains("uppercase")));
        assert!(errors.iter().any(|e| e.contains("digit")));
        assert!(errors.iter().any(|e| e.contains("special")));
        assert!(!errors.iter().any(|e| e.contains("lowercase")));
    }

    #[test]
    fn common_patterns_rejected_case_insensitively() {
        let err = validate_strength("MyQwerty9!x").unwrap_err();
        assert!(err.to_string().contains("qwerty"));
    }

    #[test]
    fn overlong_rejected() {
        let long = format!("Aa1!{}", "x".repeat(MAX_LENGTH));
        assert!(strength_violations(&long)
            .iter()
            .any(|e| e.contains("at most")));
    }

    #[tokio::test]
    async fn hash_and_verify() {
        let hash = hash_password("Str0ng!Secret", 4).await.unwrap();
        assert_ne!(hash, "Str0ng!Secret");
        assert!(verify_password("Str0ng!Secret", &hash).await.unwrap());
        assert!(!verify_password("wrong", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_hash_is_false() {
        assert!(!verify_password("anything", "not-a-bcrypt-hash").await.unwrap());
    }
}

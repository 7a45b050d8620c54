//! Salted Argon2id password hashing
//!
//! Hashes are stored as PHC strings, so parameters travel with the hash.
//! Both operations are CPU-bound; async callers run them on the blocking pool.

use std::sync::OnceLock;

use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

pub const MAX_PASSWORD_BYTES: usize = 1024;

#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
pub struct PasswordError(String);

/// Hash `password` with a fresh random salt.
pub fn hash(password: &str) -> Result<String, PasswordError> {
    let mut salt_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| PasswordError(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| PasswordError(e.to_string()))
}

/// Compare `password` against a stored PHC hash. An unparseable hash never
/// matches.
#[must_use]
pub fn verify(stored: &str, password: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Stored password hash is unparseable");
            false
        }
    }
}

/// [`hash`] on the blocking pool.
pub async fn hash_blocking(password: String) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash(&password))
        .await
        .map_err(|e| PasswordError(e.to_string()))?
}

/// [`verify`] on the blocking pool. `stored: None` runs [`verify_dummy`].
pub async fn verify_blocking(stored: Option<String>, password: String) -> bool {
    let outcome = tokio::task::spawn_blocking(move || match stored {
        Some(stored) => verify(&stored, &password),
        None => verify_dummy(&password),
    })
    .await;
    outcome.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Password verification task failed");
        false
    })
}

/// Spend the same effort as a real comparison, for usernames that do not
/// exist. Always returns `false`.
pub fn verify_dummy(password: &str) -> bool {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    if let Some(stored) = DUMMY.get_or_init(|| hash("unused-dummy-password").ok()) {
        let _ = verify(stored, password);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let stored = hash("Str0ngPass!").unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(verify(&stored, "Str0ngPass!"));
        assert!(!verify(&stored, "str0ngpass!"));
        assert!(!verify(&stored, ""));
    }

    #[test]
    fn test_fresh_salt_each_time() {
        assert_ne!(hash("same").unwrap(), hash("same").unwrap());
    }

    #[test]
    fn test_garbage_hash_never_matches() {
        assert!(!verify("not-a-phc-string", "anything"));
        assert!(!verify("", ""));
    }

    #[test]
    fn test_dummy_never_matches() {
        assert!(!verify_dummy("unused-dummy-password"));
    }

    #[tokio::test]
    async fn test_blocking_variants() {
        let stored = hash_blocking("pw".to_string()).await.unwrap();
        assert!(verify_blocking(Some(stored.clone()), "pw".to_string()).await);
        assert!(!verify_blocking(Some(stored), "nope".to_string()).await);
        assert!(!verify_blocking(None, "pw".to_string()).await);
    }
}

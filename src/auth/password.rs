use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::{error, warn};

use crate::error::AppError;

/// One-way password transform with its verify counterpart.
pub trait CredentialStore: Send + Sync {
    fn hash(&self, plain: &str) -> Result<String, AppError>;
    fn verify(&self, plain: &str, hash: &str) -> bool;
}

/// Argon2id with the crate's default cost parameters and a fresh salt per hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Credentials;

impl CredentialStore for Argon2Credentials {
    fn hash(&self, plain: &str) -> Result<String, AppError> {
        hash_password(plain)
    }

    fn verify(&self, plain: &str, hash: &str) -> bool {
        verify_password(plain, hash)
    }
}

pub fn hash_password(plain: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            AppError::Internal(anyhow::anyhow!("hash password: {}", e))
        })?
        .to_string();
    Ok(hash)
}

/// A stored hash that does not parse counts as a mismatch.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "argon2 parse hash error");
            return false;
        }
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).expect("hashing should succeed");
        assert!(verify_password(password, &hash));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hash = hash_password("correct-horse-battery-staple").expect("hashing should succeed");
        assert!(!verify_password("wrong-password", &hash));
    }

    #[test]
    fn malformed_hash_is_a_mismatch() {
        assert!(!verify_password("anything", "not-a-valid-hash"));
    }

    #[test]
    fn salts_differ_per_call() {
        let a = Argon2Credentials.hash("same").unwrap();
        let b = Argon2Credentials.hash("same").unwrap();
        assert_ne!(a, b);
        assert!(Argon2Credentials.verify("same", &a));
        assert!(Argon2Credentials.verify("same", &b));
    }
}

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

use crate::error::AuthError;

/// Produce a salted Argon2 digest in PHC string form. A fresh salt is
/// generated per call and travels inside the encoded digest, so nothing
/// besides the digest needs to be stored.
pub fn hash_password(plain: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let digest = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            AuthError::Internal(anyhow::anyhow!(e.to_string()))
        })?
        .to_string();
    Ok(digest)
}

/// Recompute with the salt embedded in `digest` and compare. The argon2
/// crate performs the comparison in constant time.
pub fn verify_password(plain: &str, digest: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(digest).map_err(|e| {
        error!(error = %e, "stored digest is not a valid PHC string");
        AuthError::Internal(anyhow::anyhow!(e.to_string()))
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

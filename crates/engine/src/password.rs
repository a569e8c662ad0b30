//! Argon2id password hashing and verification for admin accounts.
//!
//! Hashes use the PHC string format so that algorithm parameters and salt
//! travel with the hash itself.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use std::sync::LazyLock;

use argon2::Argon2;
use lockerhub_core::error::{CoreError, CoreResult};

/// Stand-in hash checked when a login has no account to verify against, so
/// that every failed login costs one Argon2 verification.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("lockerhub-no-such-account").ok());

/// Hash a plaintext password using Argon2id with a random salt.
pub fn hash_password(password: &str) -> CoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CoreError::Internal(format!("Password hashing failed: {e}")))?;
    Ok(hash.to_string())
}

/// Verify a plaintext password against a stored PHC-formatted hash.
///
/// `Ok(false)` on mismatch; `Err` only when the stored hash is unreadable.
pub fn verify_password(password: &str, hash: &str) -> CoreResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| CoreError::Internal(format!("Stored password hash is malformed: {e}")))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CoreError::Internal(format!("Password verification failed: {e}"))),
    }
}

/// Run a full verification against [`DUMMY_HASH`] and discard the result.
pub fn verify_against_dummy(password: &str) {
    note_dummy_verification();
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
}

#[cfg(any(test, feature = "test-util"))]
thread_local! {
    static DUMMY_VERIFICATIONS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

#[cfg(any(test, feature = "test-util"))]
fn note_dummy_verification() {
    DUMMY_VERIFICATIONS.with(|n| n.set(n.get() + 1));
}

#[cfg(not(any(test, feature = "test-util")))]
fn note_dummy_verification() {}

/// Dummy verifications run so far on the current thread.
#[cfg(any(test, feature = "test-util"))]
pub fn dummy_verifications() -> usize {
    DUMMY_VERIFICATIONS.with(|n| n.get())
}

//! One-time pickup PIN generation, hashing, verification and expiry.
//!
//! A PIN is six decimal digits drawn uniformly from a CSPRNG. Only
//! `salt:digest` is ever stored, where `digest` is Argon2id over the PIN with
//! a fresh 16-byte salt per call. The plaintext is handed back once for
//! delivery and must never be persisted or logged.
//!
//! Rate limiting of self-service regeneration is a parcel lifecycle policy,
//! not part of this module.

use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{Duration, Utc};
use rand::Rng;
use subtle::ConstantTimeEq;

use crate::config::KdfParams;
use crate::error::{CoreError, CoreResult};
use crate::hashing::{hex_encode, sha256_hex};
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of digits in a pickup PIN.
pub const PIN_LENGTH: usize = 6;

/// Exclusive upper bound of the PIN space (000000..=999999).
const PIN_SPACE: u32 = 1_000_000;

/// Random salt bytes per hash.
const SALT_LEN: usize = 16;

/// Derived digest length in bytes.
const DIGEST_LEN: usize = 32;

/// Separator between the salt and digest in stored material.
const SEPARATOR: char = ':';

/// Length of a self-service generation token (alphanumeric characters).
pub const TOKEN_LENGTH: usize = 40;

// ---------------------------------------------------------------------------
// Generated material
// ---------------------------------------------------------------------------

/// A freshly generated PIN and its storable hash.
pub struct GeneratedPin {
    /// Shown to the recipient exactly once. Never stored.
    pub plaintext: String,
    /// `salt:digest`, safe to persist.
    pub hash: String,
}

impl std::fmt::Debug for GeneratedPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedPin")
            .field("plaintext", &"[REDACTED]")
            .field("hash", &self.hash)
            .finish()
    }
}

/// A self-service generation token and its SHA-256 digest.
pub struct GeneratedToken {
    pub plaintext: String,
    pub hash: String,
}

// ---------------------------------------------------------------------------
// CredentialManager
// ---------------------------------------------------------------------------

/// Generates, hashes and verifies pickup PINs with a fixed KDF work factor.
#[derive(Debug, Clone)]
pub struct CredentialManager {
    params: Params,
}

impl CredentialManager {
    /// Build a manager for the given Argon2id cost parameters.
    pub fn new(kdf: &KdfParams) -> CoreResult<Self> {
        let params = Params::new(
            kdf.memory_kib,
            kdf.iterations,
            kdf.parallelism,
            Some(DIGEST_LEN),
        )
        .map_err(|e| CoreError::Validation(format!("Invalid KDF parameters: {e}")))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Generate a PIN and its stored hash.
    pub fn generate(&self) -> CoreResult<GeneratedPin> {
        let plaintext = generate_pin();
        let hash = self.hash_pin(&plaintext)?;
        Ok(GeneratedPin { plaintext, hash })
    }

    /// Hash `pin` under a fresh random salt, returning `salt:digest`.
    pub fn hash_pin(&self, pin: &str) -> CoreResult<String> {
        let salt = hex_encode(rand::random::<[u8; SALT_LEN]>());
        let digest = self.derive(pin, &salt)?;
        Ok(format!("{salt}{SEPARATOR}{digest}"))
    }

    /// Check `candidate` against stored `salt:digest` material.
    ///
    /// Malformed stored values verify as `false`; this never errors.
    pub fn verify(&self, stored: &str, candidate: &str) -> bool {
        let Some((salt, digest)) = stored.split_once(SEPARATOR) else {
            return false;
        };
        if salt.is_empty() || digest.len() != DIGEST_LEN * 2 {
            return false;
        }
        match self.derive(candidate, salt) {
            Ok(computed) => computed.as_bytes().ct_eq(digest.as_bytes()).into(),
            Err(_) => false,
        }
    }

    fn derive(&self, pin: &str, salt: &str) -> CoreResult<String> {
        let mut out = [0u8; DIGEST_LEN];
        self.argon2()
            .hash_password_into(pin.as_bytes(), salt.as_bytes(), &mut out)
            .map_err(|e| CoreError::Internal(format!("PIN key derivation failed: {e}")))?;
        Ok(hex_encode(out))
    }
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Draw a uniformly random six-digit PIN, leading zeros included.
pub fn generate_pin() -> String {
    let value = rand::rng().random_range(0..PIN_SPACE);
    format!("{value:0width$}", width = PIN_LENGTH)
}

/// True iff `candidate` is exactly six ASCII digits.
pub fn is_valid_format(candidate: &str) -> bool {
    candidate.len() == PIN_LENGTH && candidate.bytes().all(|b| b.is_ascii_digit())
}

/// True if `expiry` is absent or strictly before now. Absent fails closed.
pub fn is_expired(expiry: Option<Timestamp>) -> bool {
    is_expired_at(expiry, Utc::now())
}

pub fn is_expired_at(expiry: Option<Timestamp>, now: Timestamp) -> bool {
    match expiry {
        Some(at) => at < now,
        None => true,
    }
}

/// Expiry timestamp `hours` from now.
pub fn expiry_from(hours: i64) -> Timestamp {
    expiry_from_at(hours, Utc::now())
}

pub fn expiry_from_at(hours: i64, now: Timestamp) -> Timestamp {
    now + Duration::hours(hours)
}

/// Generate a self-service generation token. Only `hash` may be stored.
pub fn generate_generation_token() -> GeneratedToken {
    let plaintext: String = rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect();
    let hash = hash_generation_token(&plaintext);
    GeneratedToken { plaintext, hash }
}

/// SHA-256 hex digest of a generation token, used for lookup.
pub fn hash_generation_token(token: &str) -> String {
    sha256_hex(token.as_bytes())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

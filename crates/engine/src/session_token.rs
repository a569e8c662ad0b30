//! Signed admin session tokens.
//!
//! An [`AdminSession`] is never stored server-side. It travels as an HS256
//! JWT and is rebuilt from the claims on every call; the authority then
//! applies the absolute and inactivity limits itself so that it can tell the
//! two apart in the audit trail.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use lockerhub_core::admin::AdminSession;
use lockerhub_core::config::SessionConfig;
use lockerhub_core::error::{CoreError, CoreResult};
use lockerhub_core::roles::Role;
use lockerhub_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims embedded in every session token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionClaims {
    /// Subject -- the admin's internal database id.
    pub sub: DbId,
    pub username: String,
    pub role: Role,
    /// Login time (UTC Unix timestamp).
    pub login_time: i64,
    /// Last authenticated call (UTC Unix timestamp).
    pub last_activity: i64,
    /// Earliest of the absolute and inactivity deadlines.
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Unique token identifier for audit correlation.
    pub jti: String,
}

/// Sign a token carrying `session`.
pub fn issue(session: &AdminSession, config: &SessionConfig) -> CoreResult<String> {
    let claims = SessionClaims {
        sub: session.admin_id,
        username: session.username.clone(),
        role: session.role,
        login_time: session.login_time.timestamp(),
        last_activity: session.last_activity.timestamp(),
        exp: session.hard_deadline(config).timestamp(),
        iat: Utc::now().timestamp(),
        jti: Uuid::new_v4().to_string(),
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(|e| CoreError::Internal(format!("Failed to sign session token: {e}")))
}

/// Verify the signature and rebuild the session.
///
/// Expiry is not enforced here; callers apply [`AdminSession::validity_at`].
pub fn read(token: &str, config: &SessionConfig) -> CoreResult<(AdminSession, SessionClaims)> {
    let mut validation = Validation::default();
    validation.validate_exp = false;

    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )
    .map_err(|e| CoreError::Unauthorized(format!("Invalid session token: {e}")))?;

    let claims = data.claims;
    let session = AdminSession {
        admin_id: claims.sub,
        username: claims.username.clone(),
        role: claims.role,
        login_time: from_unix(claims.login_time)?,
        last_activity: from_unix(claims.last_activity)?,
    };
    Ok((session, claims))
}

fn from_unix(secs: i64) -> CoreResult<Timestamp> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| CoreError::Unauthorized("Session token carries an invalid timestamp".into()))
}

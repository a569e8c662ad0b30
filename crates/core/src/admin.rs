//! Admin accounts and the derived admin session.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::config::SessionConfig;
use crate::error::{CoreError, CoreResult};
use crate::roles::Role;
use crate::types::{DbId, Timestamp};
use crate::validation::validate_username;

/// A persisted admin account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminUser {
    pub id: DbId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: Timestamp,
    pub last_login: Option<Timestamp>,
}

/// Request to create an admin account.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAdminUser {
    #[validate(length(min = 3, max = 50))]
    pub username: String,
    #[validate(length(min = 12))]
    pub password: String,
    pub role: Role,
}

impl CreateAdminUser {
    /// Field-level checks plus the username charset.
    pub fn check(&self) -> CoreResult<()> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        validate_username(&self.username)
    }
}

/// DTO for inserting an admin with an already-hashed password.
#[derive(Debug, Clone)]
pub struct NewAdminUser {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Session state reconstructed from a signed token on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSession {
    pub admin_id: DbId,
    pub username: String,
    pub role: Role,
    pub login_time: Timestamp,
    pub last_activity: Timestamp,
}

/// Outcome of a session validity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionValidity {
    Active,
    /// Past the absolute lifetime since login.
    Expired,
    /// Idle longer than the inactivity timeout.
    Inactive,
}

impl AdminSession {
    pub fn start(user: &AdminUser, now: Timestamp) -> Self {
        Self {
            admin_id: user.id,
            username: user.username.clone(),
            role: user.role,
            login_time: now,
            last_activity: now,
        }
    }

    /// Absolute lifetime is checked before inactivity.
    pub fn validity_at(&self, config: &SessionConfig, now: Timestamp) -> SessionValidity {
        if now - self.login_time > Duration::hours(config.absolute_hours) {
            SessionValidity::Expired
        } else if now - self.last_activity > Duration::minutes(config.inactivity_minutes) {
            SessionValidity::Inactive
        } else {
            SessionValidity::Active
        }
    }

    /// Latest instant at which the session can still be valid.
    pub fn hard_deadline(&self, config: &SessionConfig) -> Timestamp {
        let absolute = self.login_time + Duration::hours(config.absolute_hours);
        let idle = self.last_activity + Duration::minutes(config.inactivity_minutes);
        absolute.min(idle)
    }

    pub fn touch(&mut self, now: Timestamp) {
        self.last_activity = now;
    }
}

//! Engine configuration value object.
//!
//! Everything that used to be ambient deployment state (PIN lifetime,
//! regeneration cap, overdue threshold, session timeouts, locker sizes) is
//! carried explicitly in [`EngineConfig`] and passed to the services that
//! need it.

use std::str::FromStr;

use crate::error::{CoreError, CoreResult};
use crate::locker::{LockerSize, NewLocker};

/// Default PIN lifetime in hours.
pub const DEFAULT_PIN_EXPIRY_HOURS: i64 = 24;
/// Default cap on self-service PIN generations per token window.
pub const DEFAULT_MAX_GENERATIONS_PER_DAY: i32 = 3;
/// Default days a parcel may wait before it is sent back.
pub const DEFAULT_MAX_PICKUP_DAYS: i64 = 7;
/// Default overdue batch interval in seconds.
pub const DEFAULT_OVERDUE_INTERVAL_SECS: u64 = 3600;
/// Default absolute admin session lifetime in hours.
pub const DEFAULT_SESSION_ABSOLUTE_HOURS: i64 = 8;
/// Default admin inactivity timeout in minutes.
pub const DEFAULT_SESSION_INACTIVITY_MINS: i64 = 30;

// ---------------------------------------------------------------------------
// KDF parameters
// ---------------------------------------------------------------------------

/// Argon2id cost parameters for PIN hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// OWASP-recommended Argon2id baseline (19 MiB, t=2, p=1).
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// The cheapest parameters Argon2 accepts. Tests and local tooling only.
    pub fn minimal() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Section configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinConfig {
    pub expiry_hours: i64,
    pub max_generations_per_day: i32,
    pub kdf: KdfParams,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            expiry_hours: DEFAULT_PIN_EXPIRY_HOURS,
            max_generations_per_day: DEFAULT_MAX_GENERATIONS_PER_DAY,
            kdf: KdfParams::default(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// HMAC-SHA256 key used to sign admin session tokens.
    pub secret: String,
    pub absolute_hours: i64,
    pub inactivity_minutes: i64,
}

impl SessionConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            absolute_hours: DEFAULT_SESSION_ABSOLUTE_HOURS,
            inactivity_minutes: DEFAULT_SESSION_INACTIVITY_MINS,
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"[REDACTED]")
            .field("absolute_hours", &self.absolute_hours)
            .field("inactivity_minutes", &self.inactivity_minutes)
            .finish()
    }
}

/// Inner dimensions of one locker size, in centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width_cm: u32,
    pub height_cm: u32,
    pub depth_cm: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockerConfig {
    pub small: Dimensions,
    pub medium: Dimensions,
    pub large: Dimensions,
    /// Lockers created at startup when none exist yet.
    pub provision: Vec<NewLocker>,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            small: Dimensions { width_cm: 30, height_cm: 30, depth_cm: 45 },
            medium: Dimensions { width_cm: 45, height_cm: 45, depth_cm: 60 },
            large: Dimensions { width_cm: 60, height_cm: 60, depth_cm: 90 },
            provision: Vec::new(),
        }
    }
}

impl LockerConfig {
    pub fn dimensions(&self, size: LockerSize) -> Dimensions {
        match size {
            LockerSize::Small => self.small,
            LockerSize::Medium => self.medium,
            LockerSize::Large => self.large,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub pin: PinConfig,
    pub max_pickup_days: i64,
    pub overdue_interval_secs: u64,
    pub session: SessionConfig,
    pub lockers: LockerConfig,
}

impl EngineConfig {
    /// Defaults everywhere, with the given session signing secret.
    pub fn new(session_secret: impl Into<String>) -> Self {
        Self {
            pin: PinConfig::default(),
            max_pickup_days: DEFAULT_MAX_PICKUP_DAYS,
            overdue_interval_secs: DEFAULT_OVERDUE_INTERVAL_SECS,
            session: SessionConfig::new(session_secret),
            lockers: LockerConfig::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Env Var                         | Required | Default |
    /// |---------------------------------|----------|---------|
    /// | `ADMIN_SESSION_SECRET`          | **yes**  | --      |
    /// | `ADMIN_SESSION_ABSOLUTE_HOURS`  | no       | `8`     |
    /// | `ADMIN_SESSION_INACTIVITY_MINS` | no       | `30`    |
    /// | `PIN_EXPIRY_HOURS`              | no       | `24`    |
    /// | `PIN_MAX_GENERATIONS_PER_DAY`   | no       | `3`     |
    /// | `PIN_KDF_MEMORY_KIB`            | no       | `19456` |
    /// | `PIN_KDF_ITERATIONS`            | no       | `2`     |
    /// | `PARCEL_MAX_PICKUP_DAYS`        | no       | `7`     |
    /// | `OVERDUE_INTERVAL_SECS`         | no       | `3600`  |
    /// | `LOCKER_PROVISION`              | no       | empty   |
    pub fn from_env() -> CoreResult<Self> {
        let secret = std::env::var("ADMIN_SESSION_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::Validation("ADMIN_SESSION_SECRET must be set".into()))?;

        let kdf_defaults = KdfParams::default();
        let kdf = KdfParams {
            memory_kib: env_or("PIN_KDF_MEMORY_KIB", kdf_defaults.memory_kib)?,
            iterations: env_or("PIN_KDF_ITERATIONS", kdf_defaults.iterations)?,
            parallelism: kdf_defaults.parallelism,
        };

        let provision = match std::env::var("LOCKER_PROVISION") {
            Ok(raw) => parse_provision_list(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            pin: PinConfig {
                expiry_hours: env_or("PIN_EXPIRY_HOURS", DEFAULT_PIN_EXPIRY_HOURS)?,
                max_generations_per_day: env_or(
                    "PIN_MAX_GENERATIONS_PER_DAY",
                    DEFAULT_MAX_GENERATIONS_PER_DAY,
                )?,
                kdf,
            },
            max_pickup_days: env_or("PARCEL_MAX_PICKUP_DAYS", DEFAULT_MAX_PICKUP_DAYS)?,
            overdue_interval_secs: env_or("OVERDUE_INTERVAL_SECS", DEFAULT_OVERDUE_INTERVAL_SECS)?,
            session: SessionConfig {
                secret,
                absolute_hours: env_or(
                    "ADMIN_SESSION_ABSOLUTE_HOURS",
                    DEFAULT_SESSION_ABSOLUTE_HOURS,
                )?,
                inactivity_minutes: env_or(
                    "ADMIN_SESSION_INACTIVITY_MINS",
                    DEFAULT_SESSION_INACTIVITY_MINS,
                )?,
            },
            lockers: LockerConfig {
                provision,
                ..LockerConfig::default()
            },
        })
    }
}

/// Read `name` and parse it, falling back to `default` when unset.
fn env_or<T: FromStr>(name: &str, default: T) -> CoreResult<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{name} has an invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

/// Parse a `location:size;location:size` provisioning list.
///
/// The size is taken after the last `:` so locations may contain colons.
pub fn parse_provision_list(raw: &str) -> CoreResult<Vec<NewLocker>> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (location, size) = entry.rsplit_once(':').ok_or_else(|| {
                CoreError::Validation(format!("Locker entry '{entry}' must be 'location:size'"))
            })?;
            let location = location.trim();
            if location.is_empty() {
                return Err(CoreError::Validation(format!(
                    "Locker entry '{entry}' has an empty location"
                )));
            }
            Ok(NewLocker {
                location: location.to_string(),
                size: size.trim().parse()?,
            })
        })
        .collect()
}

//! Audit classification, payload validation, redaction and the integrity chain.
//!
//! Every state-changing or security-relevant action becomes an
//! [`AuditEvent`]. Classification first consults the exact action table and
//! then an ordered list of pattern rules, so the outcome is reproducible
//! independent of which actions the table happens to know.

use chrono::{SubsecRound, Utc};
use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::hashing;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Action constants
// ---------------------------------------------------------------------------

/// Canonical action codes emitted by the engine.
pub mod actions {
    // Recipient / sender flows
    pub const USER_DEPOSIT: &str = "USER_DEPOSIT";
    pub const USER_DEPOSIT_FAIL_NO_CAPACITY: &str = "USER_DEPOSIT_FAIL_NO_CAPACITY";
    pub const USER_PICKUP: &str = "USER_PICKUP";
    pub const USER_PICKUP_FAIL_INVALID_PIN: &str = "USER_PICKUP_FAIL_INVALID_PIN";
    pub const USER_PICKUP_FAIL_PIN_EXPIRED: &str = "USER_PICKUP_FAIL_PIN_EXPIRED";
    pub const USER_RETRACT_DEPOSIT: &str = "USER_RETRACT_DEPOSIT";
    pub const USER_DISPUTE_PICKUP: &str = "USER_DISPUTE_PICKUP";
    pub const USER_REPORT_MISSING: &str = "USER_REPORT_MISSING";

    // Credentials
    pub const PIN_REISSUE: &str = "PIN_REISSUE";
    pub const PIN_REGENERATION: &str = "PIN_REGENERATION";
    pub const PIN_REGENERATION_RATE_LIMITED: &str = "PIN_REGENERATION_RATE_LIMITED";
    pub const PIN_GENERATION_TOKEN_ISSUED: &str = "PIN_GENERATION_TOKEN_ISSUED";
    pub const PIN_REGENERATION_INVALID_TOKEN: &str = "PIN_REGENERATION_INVALID_TOKEN";

    // Admin authentication
    pub const ADMIN_LOGIN_SUCCESS: &str = "ADMIN_LOGIN_SUCCESS";
    pub const ADMIN_LOGIN_FAIL: &str = "ADMIN_LOGIN_FAIL";
    pub const ADMIN_LOGOUT: &str = "ADMIN_LOGOUT";
    pub const ADMIN_SESSION_EXPIRED: &str = "ADMIN_SESSION_EXPIRED";
    pub const ADMIN_SESSION_INVALID: &str = "ADMIN_SESSION_INVALID";
    pub const ADMIN_PERMISSION_DENIED: &str = "ADMIN_PERMISSION_DENIED";
    pub const ADMIN_CREATE_USER: &str = "ADMIN_CREATE_USER";
    pub const ADMIN_BOOTSTRAP: &str = "ADMIN_BOOTSTRAP";

    // Admin parcel / locker operations
    pub const ADMIN_MARK_MISSING: &str = "ADMIN_MARK_MISSING";
    pub const ADMIN_RESOLVE_DISPUTE: &str = "ADMIN_RESOLVE_DISPUTE";
    pub const ADMIN_COMPLETE_RETURN: &str = "ADMIN_COMPLETE_RETURN";
    pub const ADMIN_LOCKER_STATUS_CHANGE: &str = "ADMIN_LOCKER_STATUS_CHANGE";
    pub const ADMIN_LOCKER_EMPTIED: &str = "ADMIN_LOCKER_EMPTIED";
    pub const ADMIN_PARCEL_DETACHED: &str = "ADMIN_PARCEL_DETACHED";

    // System
    pub const SYSTEM_LOCKER_PROVISIONED: &str = "SYSTEM_LOCKER_PROVISIONED";
    pub const SYSTEM_OVERDUE_RETURN: &str = "SYSTEM_OVERDUE_RETURN";
    pub const SYSTEM_OVERDUE_BATCH_COMPLETE: &str = "SYSTEM_OVERDUE_BATCH_COMPLETE";
    pub const SYSTEM_DISPUTED_PARCEL_DETACHED: &str = "SYSTEM_DISPUTED_PARCEL_DETACHED";

    // Errors
    pub const ERROR_EVENT: &str = "ERROR_EVENT";
    pub const OVERDUE_PROCESSING_FAIL: &str = "OVERDUE_PROCESSING_FAIL";
    pub const NOTIFICATION_SEND_FAIL: &str = "NOTIFICATION_SEND_FAIL";
    pub const AUDIT_VALIDATION_ERROR: &str = "AUDIT_VALIDATION_ERROR";
}

// ---------------------------------------------------------------------------
// Category / severity
// ---------------------------------------------------------------------------

define_str_enum! {
    AuditCategory("audit category") {
        UserAction = "user_action",
        AdminAction = "admin_action",
        SystemAction = "system_action",
        SecurityEvent = "security_event",
        ErrorEvent = "error_event",
    }
}

define_str_enum! {
    AuditSeverity("audit severity") {
        Low = "low",
        Medium = "medium",
        High = "high",
        Critical = "critical",
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Map an action to its category and severity.
///
/// Known actions use the exact table; anything else goes through
/// [`FALLBACK_RULES`] against the uppercased action text.
pub fn classify(action: &str) -> (AuditCategory, AuditSeverity) {
    exact_classification(action).unwrap_or_else(|| fallback_classification(action))
}

fn exact_classification(action: &str) -> Option<(AuditCategory, AuditSeverity)> {
    use actions::*;
    use AuditCategory::*;
    use AuditSeverity::*;

    let pair = match action {
        USER_DEPOSIT => (UserAction, Low),
        USER_DEPOSIT_FAIL_NO_CAPACITY => (UserAction, Medium),
        USER_PICKUP => (UserAction, Low),
        USER_PICKUP_FAIL_INVALID_PIN => (SecurityEvent, Medium),
        USER_PICKUP_FAIL_PIN_EXPIRED => (UserAction, Medium),
        USER_RETRACT_DEPOSIT => (UserAction, Low),
        USER_DISPUTE_PICKUP => (UserAction, High),
        USER_REPORT_MISSING => (UserAction, High),

        PIN_REISSUE => (AdminAction, Medium),
        PIN_REGENERATION => (UserAction, Low),
        PIN_REGENERATION_RATE_LIMITED => (SecurityEvent, Medium),
        PIN_GENERATION_TOKEN_ISSUED => (UserAction, Low),
        PIN_REGENERATION_INVALID_TOKEN => (SecurityEvent, Medium),

        ADMIN_LOGIN_SUCCESS => (SecurityEvent, Low),
        ADMIN_LOGIN_FAIL => (SecurityEvent, High),
        ADMIN_LOGOUT => (SecurityEvent, Low),
        ADMIN_SESSION_EXPIRED => (SecurityEvent, Medium),
        ADMIN_SESSION_INVALID => (SecurityEvent, High),
        ADMIN_PERMISSION_DENIED => (SecurityEvent, High),
        ADMIN_CREATE_USER => (AdminAction, High),
        ADMIN_BOOTSTRAP => (SecurityEvent, Critical),

        ADMIN_MARK_MISSING => (AdminAction, High),
        ADMIN_RESOLVE_DISPUTE => (AdminAction, Medium),
        ADMIN_COMPLETE_RETURN => (AdminAction, Low),
        ADMIN_LOCKER_STATUS_CHANGE => (AdminAction, Medium),
        ADMIN_LOCKER_EMPTIED => (AdminAction, Low),
        ADMIN_PARCEL_DETACHED => (AdminAction, Medium),

        SYSTEM_LOCKER_PROVISIONED => (SystemAction, Low),
        SYSTEM_OVERDUE_RETURN => (SystemAction, Medium),
        SYSTEM_OVERDUE_BATCH_COMPLETE => (SystemAction, Low),
        SYSTEM_DISPUTED_PARCEL_DETACHED => (SystemAction, High),

        ERROR_EVENT => (ErrorEvent, High),
        OVERDUE_PROCESSING_FAIL => (ErrorEvent, High),
        NOTIFICATION_SEND_FAIL => (ErrorEvent, Medium),
        AUDIT_VALIDATION_ERROR => (ErrorEvent, Medium),
        _ => return None,
    };
    Some(pair)
}

/// How a fallback rule inspects the uppercased action text.
#[derive(Debug, Clone, Copy)]
pub enum Pattern {
    ContainsAny(&'static [&'static str]),
    StartsWith(&'static str),
}

impl Pattern {
    fn matches(self, upper: &str) -> bool {
        match self {
            Pattern::ContainsAny(needles) => needles.iter().any(|n| upper.contains(n)),
            Pattern::StartsWith(prefix) => upper.starts_with(prefix),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FallbackRule {
    pub pattern: Pattern,
    pub category: AuditCategory,
    pub severity: AuditSeverity,
}

/// Ordered fallback rules; the first match wins.
pub const FALLBACK_RULES: &[FallbackRule] = &[
    FallbackRule {
        pattern: Pattern::ContainsAny(&["LOGIN", "LOGOUT", "AUTH", "PERMISSION"]),
        category: AuditCategory::SecurityEvent,
        severity: AuditSeverity::High,
    },
    FallbackRule {
        pattern: Pattern::StartsWith("ADMIN_"),
        category: AuditCategory::AdminAction,
        severity: AuditSeverity::Medium,
    },
    FallbackRule {
        pattern: Pattern::StartsWith("USER_"),
        category: AuditCategory::UserAction,
        severity: AuditSeverity::Low,
    },
    FallbackRule {
        pattern: Pattern::ContainsAny(&["ERROR", "FAIL", "EXCEPTION"]),
        category: AuditCategory::ErrorEvent,
        severity: AuditSeverity::High,
    },
    FallbackRule {
        pattern: Pattern::ContainsAny(&["SYSTEM", "PROCESS", "BATCH"]),
        category: AuditCategory::SystemAction,
        severity: AuditSeverity::Medium,
    },
];

/// Classification when no exact entry and no fallback rule matches.
pub const FALLBACK_DEFAULT: (AuditCategory, AuditSeverity) =
    (AuditCategory::UserAction, AuditSeverity::Low);

fn fallback_classification(action: &str) -> (AuditCategory, AuditSeverity) {
    let upper = action.to_uppercase();
    FALLBACK_RULES
        .iter()
        .find(|rule| rule.pattern.matches(&upper))
        .map(|rule| (rule.category, rule.severity))
        .unwrap_or(FALLBACK_DEFAULT)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Maximum serialized size of a details payload (characters).
pub const MAX_DETAILS_CHARS: usize = 10_000;

/// Maximum length of an action code.
pub const MAX_ACTION_LENGTH: usize = 100;

/// Details field that identifies the acting admin.
pub const ADMIN_ID_FIELD: &str = "admin_id";

/// Details field that carries the error description.
pub const ERROR_FIELD: &str = "error";

/// Details field added when category-specific fields are missing.
pub const VALIDATION_WARNING_FIELD: &str = "validation_warning";

/// Check the action code shape: non-empty, alphanumeric plus `_`, `-`, space.
pub fn validate_action(action: &str) -> CoreResult<()> {
    if action.trim().is_empty() {
        return Err(CoreError::Validation("Audit action must not be empty".into()));
    }
    if action.len() > MAX_ACTION_LENGTH {
        return Err(CoreError::Validation(format!(
            "Audit action exceeds {MAX_ACTION_LENGTH} characters"
        )));
    }
    if !action
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' '))
    {
        return Err(CoreError::Validation(format!(
            "Audit action '{action}' contains characters outside [A-Za-z0-9_- ]"
        )));
    }
    Ok(())
}

/// Validate an event payload and annotate missing category fields.
///
/// Hard failures: bad action text, non-object details, oversized details.
/// Missing `admin_id` on admin actions or `error` on error events only adds
/// a [`VALIDATION_WARNING_FIELD`] so the record is never dropped.
pub fn validate(
    action: &str,
    category: AuditCategory,
    details: serde_json::Value,
) -> CoreResult<serde_json::Value> {
    validate_action(action)?;

    let serde_json::Value::Object(mut map) = details else {
        return Err(CoreError::Validation(
            "Audit details must be a key/value object".into(),
        ));
    };

    let serialized = serde_json::to_string(&map)
        .map_err(|e| CoreError::Validation(format!("Audit details are not serializable: {e}")))?;
    if serialized.chars().count() > MAX_DETAILS_CHARS {
        return Err(CoreError::Validation(format!(
            "Audit details exceed {MAX_DETAILS_CHARS} serialized characters"
        )));
    }

    let required = match category {
        AuditCategory::AdminAction => Some(ADMIN_ID_FIELD),
        AuditCategory::ErrorEvent => Some(ERROR_FIELD),
        _ => None,
    };
    if let Some(field) = required {
        if !map.contains_key(field) {
            map.insert(
                VALIDATION_WARNING_FIELD.to_string(),
                serde_json::Value::String(format!("missing required field '{field}' for {category}")),
            );
        }
    }

    Ok(serde_json::Value::Object(map))
}

// ---------------------------------------------------------------------------
// Sensitive field redaction
// ---------------------------------------------------------------------------

/// Key fragments whose values are redacted wherever they appear in a key.
pub const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "secret",
    "api_key",
    "private_key",
    "authorization",
    "credential",
    "pin_hash",
];

/// Keys redacted only on exact match (a bare `pin` is the plaintext PIN,
/// while `pin_expires_at` is harmless).
pub const SENSITIVE_EXACT_FIELDS: &[&str] = &["pin", "new_pin", "candidate_pin"];

/// Redact sensitive fields from a JSON value, recursing into objects and arrays.
pub fn redact_sensitive_fields(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, val) in map {
                let lower_key = key.to_lowercase();
                let sensitive = SENSITIVE_FIELDS.iter().any(|f| lower_key.contains(f))
                    || SENSITIVE_EXACT_FIELDS.contains(&lower_key.as_str());
                if sensitive {
                    redacted.insert(
                        key.clone(),
                        serde_json::Value::String("[REDACTED]".to_string()),
                    );
                } else {
                    redacted.insert(key.clone(), redact_sensitive_fields(val));
                }
            }
            serde_json::Value::Object(redacted)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(redact_sensitive_fields).collect())
        }
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Who and where an action came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditContext {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub admin_id: Option<DbId>,
    pub ip_address: Option<String>,
}

impl AuditContext {
    /// Context for background work with no caller.
    pub fn system() -> Self {
        Self::default()
    }

    pub fn for_admin(admin_id: DbId) -> Self {
        Self {
            admin_id: Some(admin_id),
            ..Self::default()
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// An immutable, classified audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub action: String,
    pub category: AuditCategory,
    pub severity: AuditSeverity,
    pub details: serde_json::Value,
    pub timestamp: Timestamp,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub admin_id: Option<DbId>,
    pub ip_address: Option<String>,
}

impl AuditEvent {
    /// Classify, redact and validate an action into an event.
    ///
    /// The context's admin id is copied into the details when the caller did
    /// not supply one, so admin actions carry their actor in the payload.
    pub fn new(
        action: &str,
        details: serde_json::Value,
        context: &AuditContext,
    ) -> CoreResult<Self> {
        let (category, severity) = classify(action);

        let mut details = redact_sensitive_fields(&details);
        if let (Some(admin_id), serde_json::Value::Object(map)) = (context.admin_id, &mut details) {
            map.entry(ADMIN_ID_FIELD)
                .or_insert_with(|| serde_json::Value::from(admin_id));
        }
        let details = validate(action, category, details)?;

        Ok(Self {
            action: action.to_string(),
            category,
            severity,
            details,
            // Storage keeps microseconds; truncate so the chain hash survives a round trip.
            timestamp: Utc::now().trunc_subsecs(6),
            session_id: context.session_id.clone(),
            user_id: context.user_id.clone(),
            admin_id: context.admin_id,
            ip_address: context.ip_address.clone(),
        })
    }

    /// Canonical string form used as the integrity hash input.
    pub fn canonical_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Integrity hash chain
// ---------------------------------------------------------------------------

/// Known seed value for the first entry in the hash chain.
const CHAIN_SEED: &str = "LOCKER_AUDIT_CHAIN_SEED_V1";

/// Compute the SHA-256 integrity hash for an audit entry.
///
/// `prev_hash` is the integrity hash of the previous entry, or `None` for the
/// first entry in the chain (which uses a known seed value).
pub fn compute_integrity_hash(prev_hash: Option<&str>, entry_data: &str) -> String {
    let prev = prev_hash.unwrap_or(CHAIN_SEED);
    let combined = format!("{prev}|{entry_data}");
    hashing::sha256_hex(combined.as_bytes())
}

/// An audit event as persisted, with its position and chain hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredAuditEvent {
    pub id: DbId,
    pub event: AuditEvent,
    pub integrity_hash: String,
}

/// Result of an audit chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityCheckResult {
    /// Number of entries verified.
    pub verified_entries: i64,
    /// Whether the entire chain is valid.
    pub chain_valid: bool,
    /// ID of the first entry where the chain breaks, if any.
    pub first_break: Option<DbId>,
}

/// Recompute the chain over `entries` (ascending id) and report the first break.
///
/// `prev_hash` is the hash preceding the first entry, `None` when the slice
/// starts at the beginning of the log.
pub fn verify_chain(prev_hash: Option<&str>, entries: &[StoredAuditEvent]) -> IntegrityCheckResult {
    let mut prev = prev_hash.map(str::to_string);
    let mut verified = 0;

    for entry in entries {
        let expected = compute_integrity_hash(prev.as_deref(), &entry.event.canonical_data());
        if expected != entry.integrity_hash {
            return IntegrityCheckResult {
                verified_entries: verified,
                chain_valid: false,
                first_break: Some(entry.id),
            };
        }
        verified += 1;
        prev = Some(entry.integrity_hash.clone());
    }

    IntegrityCheckResult {
        verified_entries: verified,
        chain_valid: true,
        first_break: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

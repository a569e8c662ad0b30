use crate::types::DbId;

/// Message shown to end users when the failure is internal to the system.
pub const GENERIC_SYSTEM_ERROR: &str = "A system error occurred. Please try again later.";

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid {entity} transition: '{from}' -> '{to}'")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("{entity} {id} is '{current}', expected {expected}")]
    InvalidState {
        entity: &'static str,
        id: DbId,
        current: String,
        expected: String,
    },

    #[error("No free {size} locker available")]
    NoCapacity { size: String },

    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Notification delivery failed: {0}")]
    Delivery(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the whole operation may be retried once from scratch.
    ///
    /// Only a lost race qualifies: nothing from the failed attempt was
    /// committed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ConcurrencyConflict(_))
    }

    /// Text that is safe to show to the end user.
    ///
    /// Storage and internal failures collapse to [`GENERIC_SYSTEM_ERROR`];
    /// their detail belongs in the audit trail, not in the response.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::Persistence(_) | CoreError::Internal(_) => {
                GENERIC_SYSTEM_ERROR.to_string()
            }
            CoreError::Validation(msg)
            | CoreError::Unauthorized(msg)
            | CoreError::Forbidden(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

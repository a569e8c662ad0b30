//! Mapping from `sqlx` failures to engine errors.

use lockerhub_core::error::CoreError;

/// PostgreSQL `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Classify a sqlx error for the engine.
///
/// Unique violations on a `uq_*` constraint become [`CoreError::Conflict`];
/// everything else is a [`CoreError::Persistence`] failure.
pub fn into_core(err: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            let constraint = db_err.constraint().unwrap_or("unknown");
            if constraint.starts_with("uq_") {
                return CoreError::Conflict(format!(
                    "Duplicate value violates unique constraint: {constraint}"
                ));
            }
        }
    }
    tracing::error!(error = %err, "Database error");
    CoreError::Persistence(err.to_string())
}

/// A stored row whose text column no longer parses into its enum.
pub fn corrupt_row(table: &str, id: i64, err: CoreError) -> CoreError {
    CoreError::Internal(format!("{table} row {id} is unreadable: {err}"))
}

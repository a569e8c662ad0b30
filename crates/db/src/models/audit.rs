//! Row model for the append-only `audit_logs` table.
//!
//! Audit rows have no `updated_at` field (immutable records).

use lockerhub_core::audit::{AuditEvent, StoredAuditEvent};
use lockerhub_core::error::CoreError;
use lockerhub_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use crate::error::corrupt_row;

/// A single audit log row. Immutable once created.
#[derive(Debug, Clone, FromRow)]
pub struct AuditLogRow {
    pub id: DbId,
    pub timestamp: Timestamp,
    pub action: String,
    pub category: String,
    pub severity: String,
    pub details: serde_json::Value,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub admin_id: Option<DbId>,
    pub ip_address: Option<String>,
    pub integrity_hash: String,
}

impl TryFrom<AuditLogRow> for StoredAuditEvent {
    type Error = CoreError;

    fn try_from(row: AuditLogRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let event = AuditEvent {
            action: row.action,
            category: row.category.parse().map_err(|e| corrupt_row("audit_logs", id, e))?,
            severity: row.severity.parse().map_err(|e| corrupt_row("audit_logs", id, e))?,
            details: row.details,
            timestamp: row.timestamp,
            session_id: row.session_id,
            user_id: row.user_id,
            admin_id: row.admin_id,
            ip_address: row.ip_address,
        };
        Ok(StoredAuditEvent {
            id,
            event,
            integrity_hash: row.integrity_hash,
        })
    }
}

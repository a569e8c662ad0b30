//! Row model for the `lockers` table.

use lockerhub_core::error::CoreError;
use lockerhub_core::locker::{Locker, LockerStatus, StatusCount};
use lockerhub_core::types::{DbId, Timestamp, Version};
use sqlx::FromRow;

use crate::error::corrupt_row;

#[derive(Debug, Clone, FromRow)]
pub struct LockerRow {
    pub id: DbId,
    pub location: String,
    pub size: String,
    pub status: String,
    pub version: Version,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<LockerRow> for Locker {
    type Error = CoreError;

    fn try_from(row: LockerRow) -> Result<Self, Self::Error> {
        let id = row.id;
        Ok(Locker {
            id,
            location: row.location,
            size: row.size.parse().map_err(|e| corrupt_row("lockers", id, e))?,
            status: row.status.parse().map_err(|e| corrupt_row("lockers", id, e))?,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// One `GROUP BY status` result.
#[derive(Debug, Clone, FromRow)]
pub struct StatusCountRow {
    pub status: String,
    pub count: i64,
}

impl TryFrom<StatusCountRow> for StatusCount {
    type Error = CoreError;

    fn try_from(row: StatusCountRow) -> Result<Self, Self::Error> {
        let status: LockerStatus = row
            .status
            .parse()
            .map_err(|e| CoreError::Internal(format!("Unreadable locker status count: {e}")))?;
        Ok(StatusCount { status, count: row.count })
    }
}

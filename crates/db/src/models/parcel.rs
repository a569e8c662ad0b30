//! Row model for the `parcels` table.

use lockerhub_core::error::CoreError;
use lockerhub_core::parcel::Parcel;
use lockerhub_core::types::{DbId, Timestamp, Version};
use sqlx::FromRow;

use crate::error::corrupt_row;

#[derive(Debug, Clone, FromRow)]
pub struct ParcelRow {
    pub id: DbId,
    pub locker_id: Option<DbId>,
    pub recipient_email: String,
    pub status: String,
    pub deposited_at: Timestamp,
    pub pin_hash: Option<String>,
    pub pin_expires_at: Option<Timestamp>,
    pub pin_generation_count: i32,
    pub last_pin_generation_at: Option<Timestamp>,
    pub generation_token_hash: Option<String>,
    pub reference_code: Option<String>,
    pub version: Version,
    pub updated_at: Timestamp,
}

impl TryFrom<ParcelRow> for Parcel {
    type Error = CoreError;

    fn try_from(row: ParcelRow) -> Result<Self, Self::Error> {
        let id = row.id;
        Ok(Parcel {
            id,
            locker_id: row.locker_id,
            recipient_email: row.recipient_email,
            status: row.status.parse().map_err(|e| corrupt_row("parcels", id, e))?,
            deposited_at: row.deposited_at,
            pin_hash: row.pin_hash,
            pin_expires_at: row.pin_expires_at,
            pin_generation_count: row.pin_generation_count,
            last_pin_generation_at: row.last_pin_generation_at,
            generation_token_hash: row.generation_token_hash,
            reference_code: row.reference_code,
            version: row.version,
            updated_at: row.updated_at,
        })
    }
}

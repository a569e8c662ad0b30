//! Repository for the `parcels` table.

use lockerhub_core::parcel::{NewParcel, Parcel};
use lockerhub_core::types::DbId;
use sqlx::{PgExecutor, PgPool};

use crate::models::parcel::ParcelRow;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, locker_id, recipient_email, status, deposited_at, pin_hash, \
                       pin_expires_at, pin_generation_count, last_pin_generation_at, \
                       generation_token_hash, reference_code, version, updated_at";

/// Provides queries and versioned updates for parcels.
pub struct ParcelRepo;

impl ParcelRepo {
    /// Insert a freshly deposited parcel, returning the created row.
    pub async fn create(pool: &PgPool, input: &NewParcel) -> Result<ParcelRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO parcels (locker_id, recipient_email, status, deposited_at, pin_hash, pin_expires_at)
             VALUES ($1, $2, 'deposited', $3, $4, $5)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ParcelRow>(&query)
            .bind(input.locker_id)
            .bind(&input.recipient_email)
            .bind(input.deposited_at)
            .bind(&input.pin_hash)
            .bind(input.pin_expires_at)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ParcelRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM parcels WHERE id = $1");
        sqlx::query_as::<_, ParcelRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_locker_and_status(
        pool: &PgPool,
        locker_id: DbId,
        status: &str,
    ) -> Result<Vec<ParcelRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM parcels WHERE locker_id = $1 AND status = $2 ORDER BY id ASC"
        );
        sqlx::query_as::<_, ParcelRow>(&query)
            .bind(locker_id)
            .bind(status)
            .fetch_all(pool)
            .await
    }

    /// All parcels in `status`, oldest deposit first.
    pub async fn list_by_status(pool: &PgPool, status: &str) -> Result<Vec<ParcelRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM parcels WHERE status = $1 ORDER BY deposited_at ASC, id ASC"
        );
        sqlx::query_as::<_, ParcelRow>(&query)
            .bind(status)
            .fetch_all(pool)
            .await
    }

    pub async fn find_by_generation_token_hash(
        pool: &PgPool,
        hash: &str,
    ) -> Result<Option<ParcelRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM parcels WHERE generation_token_hash = $1");
        sqlx::query_as::<_, ParcelRow>(&query)
            .bind(hash)
            .fetch_optional(pool)
            .await
    }

    /// Write every mutable column of `parcel` if its version still matches.
    ///
    /// Returns `None` when the row is missing or has moved on.
    pub async fn update_versioned<'e, E: PgExecutor<'e>>(
        executor: E,
        parcel: &Parcel,
    ) -> Result<Option<ParcelRow>, sqlx::Error> {
        let query = format!(
            "UPDATE parcels SET
                locker_id = $2,
                status = $3,
                pin_hash = $4,
                pin_expires_at = $5,
                pin_generation_count = $6,
                last_pin_generation_at = $7,
                generation_token_hash = $8,
                reference_code = $9,
                version = version + 1,
                updated_at = NOW()
             WHERE id = $1 AND version = $10
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ParcelRow>(&query)
            .bind(parcel.id)
            .bind(parcel.locker_id)
            .bind(parcel.status.as_str())
            .bind(&parcel.pin_hash)
            .bind(parcel.pin_expires_at)
            .bind(parcel.pin_generation_count)
            .bind(parcel.last_pin_generation_at)
            .bind(&parcel.generation_token_hash)
            .bind(&parcel.reference_code)
            .bind(parcel.version)
            .fetch_optional(executor)
            .await
    }

    /// Whether a parcel row with `id` exists at all.
    pub async fn exists<'e, E: PgExecutor<'e>>(executor: E, id: DbId) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM parcels WHERE id = $1)")
            .bind(id)
            .fetch_one(executor)
            .await
    }
}

//! Repository for the `lockers` table.

use lockerhub_core::locker::{Locker, NewLocker};
use lockerhub_core::types::DbId;
use sqlx::{PgExecutor, PgPool};

use crate::models::locker::{LockerRow, StatusCountRow};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, location, size, status, version, created_at, updated_at";

/// Provides queries and versioned updates for lockers.
pub struct LockerRepo;

impl LockerRepo {
    /// Insert a new `free` locker, returning the created row.
    pub async fn create(pool: &PgPool, input: &NewLocker) -> Result<LockerRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO lockers (location, size)
             VALUES ($1, $2)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LockerRow>(&query)
            .bind(&input.location)
            .bind(input.size.as_str())
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<LockerRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM lockers WHERE id = $1");
        sqlx::query_as::<_, LockerRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list(pool: &PgPool) -> Result<Vec<LockerRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM lockers ORDER BY id ASC");
        sqlx::query_as::<_, LockerRow>(&query).fetch_all(pool).await
    }

    pub async fn count_by_status(pool: &PgPool) -> Result<Vec<StatusCountRow>, sqlx::Error> {
        sqlx::query_as::<_, StatusCountRow>(
            "SELECT status, COUNT(*)::BIGINT AS count FROM lockers GROUP BY status ORDER BY status",
        )
        .fetch_all(pool)
        .await
    }

    /// Atomically reserve one free locker of `size`, flipping it to `occupied`.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent reservations never
    /// receive the same locker. Lockers with a deposited or disputed parcel
    /// still attached are skipped.
    pub async fn reserve_free_by_size(
        pool: &PgPool,
        size: &str,
    ) -> Result<Option<LockerRow>, sqlx::Error> {
        let query = format!(
            "UPDATE lockers \
             SET status = 'occupied', version = version + 1, updated_at = NOW() \
             WHERE status = 'free' AND id = ( \
                 SELECT l.id FROM lockers l \
                 WHERE l.size = $1 AND l.status = 'free' \
                   AND NOT EXISTS ( \
                       SELECT 1 FROM parcels p \
                       WHERE p.locker_id = l.id \
                         AND p.status IN ('deposited', 'pickup_disputed') \
                   ) \
                 ORDER BY l.id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LockerRow>(&query)
            .bind(size)
            .fetch_optional(pool)
            .await
    }

    /// Write `locker` if its version still matches, bumping the version.
    ///
    /// Returns `None` when the row is missing or has moved on.
    pub async fn update_versioned<'e, E: PgExecutor<'e>>(
        executor: E,
        locker: &Locker,
    ) -> Result<Option<LockerRow>, sqlx::Error> {
        let query = format!(
            "UPDATE lockers SET
                location = $2,
                status = $3,
                version = version + 1,
                updated_at = NOW()
             WHERE id = $1 AND version = $4
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LockerRow>(&query)
            .bind(locker.id)
            .bind(&locker.location)
            .bind(locker.status.as_str())
            .bind(locker.version)
            .fetch_optional(executor)
            .await
    }

    /// Whether a locker row with `id` exists at all.
    pub async fn exists<'e, E: PgExecutor<'e>>(executor: E, id: DbId) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM lockers WHERE id = $1)")
            .bind(id)
            .fetch_one(executor)
            .await
    }
}

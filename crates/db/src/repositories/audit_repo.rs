//! Repository for the append-only `audit_logs` table.

use lockerhub_core::audit::{compute_integrity_hash, AuditEvent};
use lockerhub_core::types::DbId;
use sqlx::{PgExecutor, PgPool};

use crate::models::audit::AuditLogRow;

/// Column list for `audit_logs` SELECT queries.
const COLUMNS: &str = "\
    id, timestamp, action, category, severity, details, \
    session_id, user_id, admin_id, ip_address, integrity_hash";

/// Advisory lock key serializing chain appends across processes.
const CHAIN_LOCK_KEY: i64 = 0x4c4b_5f41_5544_4954;

/// Provides chained inserts and integrity reads for audit logs.
pub struct AuditLogRepo;

impl AuditLogRepo {
    /// Append one event, chaining its hash to the current last row.
    ///
    /// Holds a transaction-scoped advisory lock across the read of the last
    /// hash and the insert, so two writers never chain onto the same row.
    pub async fn append_chained(pool: &PgPool, event: &AuditEvent) -> Result<AuditLogRow, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CHAIN_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let prev = Self::find_last_hash(&mut *tx).await?;
        let hash = compute_integrity_hash(prev.as_deref(), &event.canonical_data());
        let row = Self::insert(&mut *tx, event, &hash).await?;

        tx.commit().await?;
        Ok(row)
    }

    /// Insert a row with a precomputed integrity hash.
    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        event: &AuditEvent,
        integrity_hash: &str,
    ) -> Result<AuditLogRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO audit_logs \
                (timestamp, action, category, severity, details, \
                 session_id, user_id, admin_id, ip_address, integrity_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AuditLogRow>(&query)
            .bind(event.timestamp)
            .bind(&event.action)
            .bind(event.category.as_str())
            .bind(event.severity.as_str())
            .bind(&event.details)
            .bind(&event.session_id)
            .bind(&event.user_id)
            .bind(event.admin_id)
            .bind(&event.ip_address)
            .bind(integrity_hash)
            .fetch_one(executor)
            .await
    }

    /// Find the integrity hash of the most recent audit log entry.
    pub async fn find_last_hash<'e, E: PgExecutor<'e>>(
        executor: E,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT integrity_hash FROM audit_logs ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(executor)
        .await
    }

    /// Integrity hash of the row just before `id`, if any.
    pub async fn find_hash_before(pool: &PgPool, id: DbId) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT integrity_hash FROM audit_logs WHERE id < $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Fetch entries in id order for sequential hash chain checking.
    pub async fn fetch_for_integrity_check(
        pool: &PgPool,
        from_id: Option<DbId>,
    ) -> Result<Vec<AuditLogRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM audit_logs WHERE id >= $1 ORDER BY id ASC"
        );
        sqlx::query_as::<_, AuditLogRow>(&query)
            .bind(from_id.unwrap_or(0))
            .fetch_all(pool)
            .await
    }

    /// Most recent entries with `action`, newest first.
    pub async fn list_by_action(
        pool: &PgPool,
        action: &str,
        limit: i64,
    ) -> Result<Vec<AuditLogRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM audit_logs WHERE action = $1 ORDER BY id DESC LIMIT $2"
        );
        sqlx::query_as::<_, AuditLogRow>(&query)
            .bind(action)
            .bind(limit.clamp(1, 500))
            .fetch_all(pool)
            .await
    }
}

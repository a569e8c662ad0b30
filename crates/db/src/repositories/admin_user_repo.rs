//! Repository for the `admin_users` table.

use lockerhub_core::admin::{AdminUser, NewAdminUser};
use lockerhub_core::types::DbId;
use sqlx::PgPool;

use crate::models::admin_user::AdminUserRow;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, username, password_hash, role, created_at, last_login";

/// Provides CRUD operations for admin accounts.
pub struct AdminUserRepo;

impl AdminUserRepo {
    /// Insert a new admin, returning the created row.
    ///
    /// A taken username violates `uq_admin_users_username`.
    pub async fn create(pool: &PgPool, input: &NewAdminUser) -> Result<AdminUserRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO admin_users (username, password_hash, role)
             VALUES ($1, $2, $3)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AdminUserRow>(&query)
            .bind(&input.username)
            .bind(&input.password_hash)
            .bind(input.role.as_str())
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<AdminUserRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM admin_users WHERE id = $1");
        sqlx::query_as::<_, AdminUserRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find an admin by username (case-sensitive).
    pub async fn find_by_username(
        pool: &PgPool,
        username: &str,
    ) -> Result<Option<AdminUserRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM admin_users WHERE username = $1");
        sqlx::query_as::<_, AdminUserRow>(&query)
            .bind(username)
            .fetch_optional(pool)
            .await
    }

    /// Write the mutable columns. Returns `true` if the row was updated.
    pub async fn update(pool: &PgPool, user: &AdminUser) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE admin_users SET
                password_hash = $2,
                role = $3,
                last_login = $4
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.last_login)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*)::BIGINT FROM admin_users")
            .fetch_one(pool)
            .await
    }
}

//! Row model for the `admin_users` table.

use lockerhub_core::admin::AdminUser;
use lockerhub_core::error::CoreError;
use lockerhub_core::roles::parse_role;
use lockerhub_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// Full admin row. Contains the password hash; never serialize it.
#[derive(Debug, Clone, FromRow)]
pub struct AdminUserRow {
    pub id: DbId,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: Timestamp,
    pub last_login: Option<Timestamp>,
}

impl TryFrom<AdminUserRow> for AdminUser {
    type Error = CoreError;

    /// An unknown role is an error, never an account without permissions.
    fn try_from(row: AdminUserRow) -> Result<Self, Self::Error> {
        Ok(AdminUser {
            id: row.id,
            role: parse_role(&row.role)?,
            username: row.username,
            password_hash: row.password_hash,
            created_at: row.created_at,
            last_login: row.last_login,
        })
    }
}

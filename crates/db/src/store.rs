//! [`PgStore`]: the engine's store traits over PostgreSQL.
//!
//! Versioned writes use `UPDATE ... WHERE version = $n`; a write that
//! matches no row is re-checked to tell a missing row from a stale one.
//! Multi-entity writes run in one transaction that is dropped (rolled back)
//! on the first failure.

use async_trait::async_trait;
use lockerhub_core::admin::{AdminUser, NewAdminUser};
use lockerhub_core::error::{CoreError, CoreResult};
use lockerhub_core::locker::{Locker, LockerSize, NewLocker, StatusCount};
use lockerhub_core::parcel::{NewParcel, Parcel, ParcelStatus};
use lockerhub_core::store::{AdminStore, LockerStore, ParcelStore};
use lockerhub_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::error::into_core;
use crate::repositories::{AdminUserRepo, LockerRepo, ParcelRepo};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn stale(entity: &str, id: DbId) -> CoreError {
    CoreError::ConcurrencyConflict(format!("{entity} {id} changed since it was read"))
}

async fn update_locker(conn: &mut PgConnection, locker: &Locker) -> CoreResult<Locker> {
    match LockerRepo::update_versioned(&mut *conn, locker).await.map_err(into_core)? {
        Some(row) => row.try_into(),
        None if LockerRepo::exists(&mut *conn, locker.id).await.map_err(into_core)? => {
            Err(stale("locker", locker.id))
        }
        None => Err(CoreError::NotFound { entity: "locker", id: locker.id }),
    }
}

async fn update_parcel(conn: &mut PgConnection, parcel: &Parcel) -> CoreResult<Parcel> {
    match ParcelRepo::update_versioned(&mut *conn, parcel).await.map_err(into_core)? {
        Some(row) => row.try_into(),
        None if ParcelRepo::exists(&mut *conn, parcel.id).await.map_err(into_core)? => {
            Err(stale("parcel", parcel.id))
        }
        None => Err(CoreError::NotFound { entity: "parcel", id: parcel.id }),
    }
}

// ---------------------------------------------------------------------------
// Lockers
// ---------------------------------------------------------------------------

#[async_trait]
impl LockerStore for PgStore {
    async fn get_by_id(&self, id: DbId) -> CoreResult<Option<Locker>> {
        LockerRepo::find_by_id(&self.pool, id)
            .await
            .map_err(into_core)?
            .map(Locker::try_from)
            .transpose()
    }

    async fn reserve_free_by_size(&self, size: LockerSize) -> CoreResult<Option<Locker>> {
        LockerRepo::reserve_free_by_size(&self.pool, size.as_str())
            .await
            .map_err(into_core)?
            .map(Locker::try_from)
            .transpose()
    }

    async fn save(&self, locker: &Locker) -> CoreResult<Locker> {
        let mut conn = self.pool.acquire().await.map_err(into_core)?;
        update_locker(&mut conn, locker).await
    }

    async fn get_all(&self) -> CoreResult<Vec<Locker>> {
        LockerRepo::list(&self.pool)
            .await
            .map_err(into_core)?
            .into_iter()
            .map(Locker::try_from)
            .collect()
    }

    async fn count_by_status(&self) -> CoreResult<Vec<StatusCount>> {
        LockerRepo::count_by_status(&self.pool)
            .await
            .map_err(into_core)?
            .into_iter()
            .map(StatusCount::try_from)
            .collect()
    }

    async fn create(&self, input: &NewLocker) -> CoreResult<Locker> {
        LockerRepo::create(&self.pool, input)
            .await
            .map_err(into_core)?
            .try_into()
    }
}

// ---------------------------------------------------------------------------
// Parcels
// ---------------------------------------------------------------------------

#[async_trait]
impl ParcelStore for PgStore {
    async fn get_by_id(&self, id: DbId) -> CoreResult<Option<Parcel>> {
        ParcelRepo::find_by_id(&self.pool, id)
            .await
            .map_err(into_core)?
            .map(Parcel::try_from)
            .transpose()
    }

    async fn get_all_by_locker_and_status(
        &self,
        locker_id: DbId,
        status: ParcelStatus,
    ) -> CoreResult<Vec<Parcel>> {
        ParcelRepo::list_by_locker_and_status(&self.pool, locker_id, status.as_str())
            .await
            .map_err(into_core)?
            .into_iter()
            .map(Parcel::try_from)
            .collect()
    }

    async fn get_by_status(&self, status: ParcelStatus) -> CoreResult<Vec<Parcel>> {
        ParcelRepo::list_by_status(&self.pool, status.as_str())
            .await
            .map_err(into_core)?
            .into_iter()
            .map(Parcel::try_from)
            .collect()
    }

    async fn get_by_generation_token_hash(&self, hash: &str) -> CoreResult<Option<Parcel>> {
        ParcelRepo::find_by_generation_token_hash(&self.pool, hash)
            .await
            .map_err(into_core)?
            .map(Parcel::try_from)
            .transpose()
    }

    async fn create(&self, input: &NewParcel) -> CoreResult<Parcel> {
        ParcelRepo::create(&self.pool, input)
            .await
            .map_err(into_core)?
            .try_into()
    }

    async fn save(&self, parcel: &Parcel) -> CoreResult<Parcel> {
        let mut conn = self.pool.acquire().await.map_err(into_core)?;
        update_parcel(&mut conn, parcel).await
    }

    async fn save_all(&self, parcels: &[Parcel]) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(into_core)?;
        for parcel in parcels {
            update_parcel(&mut tx, parcel).await?;
        }
        tx.commit().await.map_err(into_core)
    }

    async fn save_with_locker(&self, parcels: &[Parcel], locker: &Locker) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(into_core)?;
        update_locker(&mut tx, locker).await?;
        for parcel in parcels {
            update_parcel(&mut tx, parcel).await?;
        }
        tx.commit().await.map_err(into_core)
    }
}

// ---------------------------------------------------------------------------
// Admins
// ---------------------------------------------------------------------------

#[async_trait]
impl AdminStore for PgStore {
    async fn get_by_username(&self, username: &str) -> CoreResult<Option<AdminUser>> {
        AdminUserRepo::find_by_username(&self.pool, username)
            .await
            .map_err(into_core)?
            .map(AdminUser::try_from)
            .transpose()
    }

    async fn get_by_id(&self, id: DbId) -> CoreResult<Option<AdminUser>> {
        AdminUserRepo::find_by_id(&self.pool, id)
            .await
            .map_err(into_core)?
            .map(AdminUser::try_from)
            .transpose()
    }

    async fn create(&self, input: &NewAdminUser) -> CoreResult<AdminUser> {
        AdminUserRepo::create(&self.pool, input)
            .await
            .map_err(into_core)?
            .try_into()
    }

    async fn save(&self, user: &AdminUser) -> CoreResult<()> {
        if AdminUserRepo::update(&self.pool, user).await.map_err(into_core)? {
            Ok(())
        } else {
            Err(CoreError::NotFound { entity: "admin_user", id: user.id })
        }
    }

    async fn count(&self) -> CoreResult<i64> {
        AdminUserRepo::count(&self.pool).await.map_err(into_core)
    }
}

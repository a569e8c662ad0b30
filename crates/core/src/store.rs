//! Collaborator interfaces the engine calls through.
//!
//! Storage adapters (PostgreSQL, in-memory) and delivery adapters (SMTP,
//! log-only) implement these. Every write that carries a `version` is
//! conditional: an adapter must reject it with
//! [`CoreError::ConcurrencyConflict`](crate::error::CoreError) when the stored
//! row has moved on, and bump the version when it accepts it.

use async_trait::async_trait;

use crate::admin::{AdminUser, NewAdminUser};
use crate::audit::AuditEvent;
use crate::error::CoreResult;
use crate::locker::{Locker, LockerSize, NewLocker, StatusCount};
use crate::notification::{NotificationData, NotificationKind};
use crate::parcel::{NewParcel, Parcel, ParcelStatus};
use crate::types::DbId;

#[async_trait]
pub trait LockerStore: Send + Sync {
    async fn get_by_id(&self, id: DbId) -> CoreResult<Option<Locker>>;

    /// Atomically pick one `free` locker of `size` and flip it to `occupied`.
    ///
    /// Lockers that still have an active parcel attached are never chosen.
    /// Two concurrent callers must never receive the same locker.
    async fn reserve_free_by_size(&self, size: LockerSize) -> CoreResult<Option<Locker>>;

    /// Versioned write. Returns the stored row with its new version.
    async fn save(&self, locker: &Locker) -> CoreResult<Locker>;

    async fn get_all(&self) -> CoreResult<Vec<Locker>>;

    async fn count_by_status(&self) -> CoreResult<Vec<StatusCount>>;

    async fn create(&self, input: &NewLocker) -> CoreResult<Locker>;
}

#[async_trait]
pub trait ParcelStore: Send + Sync {
    async fn get_by_id(&self, id: DbId) -> CoreResult<Option<Parcel>>;

    async fn get_all_by_locker_and_status(
        &self,
        locker_id: DbId,
        status: ParcelStatus,
    ) -> CoreResult<Vec<Parcel>>;

    /// All parcels in `status`, oldest deposit first.
    async fn get_by_status(&self, status: ParcelStatus) -> CoreResult<Vec<Parcel>>;

    async fn get_by_generation_token_hash(&self, hash: &str) -> CoreResult<Option<Parcel>>;

    async fn create(&self, input: &NewParcel) -> CoreResult<Parcel>;

    /// Versioned write. Returns the stored row with its new version.
    async fn save(&self, parcel: &Parcel) -> CoreResult<Parcel>;

    /// Versioned batch write, all or nothing.
    async fn save_all(&self, parcels: &[Parcel]) -> CoreResult<()>;

    /// Versioned write of parcels together with one locker, all or nothing.
    async fn save_with_locker(&self, parcels: &[Parcel], locker: &Locker) -> CoreResult<()>;
}

#[async_trait]
pub trait AdminStore: Send + Sync {
    async fn get_by_username(&self, username: &str) -> CoreResult<Option<AdminUser>>;

    async fn get_by_id(&self, id: DbId) -> CoreResult<Option<AdminUser>>;

    /// Fails with `Conflict` when the username is taken.
    async fn create(&self, input: &NewAdminUser) -> CoreResult<AdminUser>;

    async fn save(&self, user: &AdminUser) -> CoreResult<()>;

    async fn count(&self) -> CoreResult<i64>;
}

/// Hand-off point for audit events.
///
/// Appending must not block on durability; an error means the event could
/// not even be queued.
pub trait AuditSink: Send + Sync {
    fn append(&self, event: AuditEvent) -> CoreResult<()>;
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        kind: NotificationKind,
        data: &NotificationData,
    ) -> CoreResult<()>;
}

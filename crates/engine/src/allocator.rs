//! Locker allocation and guarded locker status changes.
//!
//! Reservation is delegated to the store's atomic
//! [`LockerStore::reserve_free_by_size`]; this service never reads a free
//! locker and writes it back in two steps. Status changes go through the
//! locker transition table plus the parcel-aware guards below.

use std::sync::Arc;

use chrono::Utc;
use lockerhub_core::audit::{actions, AuditContext};
use lockerhub_core::error::{CoreError, CoreResult};
use lockerhub_core::locker::{Locker, LockerSize, LockerStatus, NewLocker, StatusCount};
use lockerhub_core::parcel::{generate_reference_code, Parcel, ParcelStatus};
use lockerhub_core::roles::Permission;
use lockerhub_core::store::{LockerStore, ParcelStore};
use lockerhub_core::types::DbId;
use serde_json::json;

use crate::audit_trail::AuditTrail;
use crate::authority::Grant;

/// Result of [`LockerAllocator::mark_emptied`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmptyOutcome {
    Emptied(Locker),
    /// The locker was not awaiting collection; nothing changed.
    NotAwaitingCollection { current: LockerStatus },
}

#[derive(Clone)]
pub struct LockerAllocator {
    lockers: Arc<dyn LockerStore>,
    parcels: Arc<dyn ParcelStore>,
    audit: AuditTrail,
}

impl LockerAllocator {
    pub fn new(lockers: Arc<dyn LockerStore>, parcels: Arc<dyn ParcelStore>, audit: AuditTrail) -> Self {
        Self { lockers, parcels, audit }
    }

    pub async fn get(&self, locker_id: DbId) -> CoreResult<Locker> {
        self.fetch(locker_id)
            .await
            .map_err(|e| self.audit.escalate("get_locker", e, &AuditContext::system()))
    }

    async fn fetch(&self, locker_id: DbId) -> CoreResult<Locker> {
        self.lockers
            .get_by_id(locker_id)
            .await?
            .ok_or(CoreError::NotFound { entity: "locker", id: locker_id })
    }

    /// Find and reserve one free locker of `size`, or `None` when full.
    ///
    /// The returned locker is already `occupied`.
    pub async fn find_available(
        &self,
        size: LockerSize,
        ctx: &AuditContext,
    ) -> CoreResult<Option<Locker>> {
        let reserved = self
            .lockers
            .reserve_free_by_size(size)
            .await
            .map_err(|e| self.audit.escalate("find_available", e, ctx))?;
        match &reserved {
            Some(locker) => tracing::debug!(locker_id = locker.id, %size, "Locker reserved"),
            None => tracing::info!(%size, "No free locker available"),
        }
        Ok(reserved)
    }

    /// Change a locker's status on behalf of an admin.
    ///
    /// - `free` is refused while any parcel on the locker is disputed or
    ///   still deposited. Missing parcels still attached are detached with a
    ///   reference code in the same write.
    /// - `occupied` is only reachable from `out_of_service`, and only when a
    ///   deposited parcel already references the locker.
    /// - Everything else follows the transition table.
    pub async fn set_status(
        &self,
        grant: &Grant,
        locker_id: DbId,
        target: LockerStatus,
    ) -> CoreResult<Locker> {
        crate::authority::require(&self.audit, grant, Permission::ManageLockers)?;
        let ctx = grant.context();
        let (from, saved) = self
            .change_status(locker_id, target, ctx)
            .await
            .map_err(|e| self.audit.escalate("set_status", e, ctx))?;

        tracing::info!(locker_id, %from, to = %target, admin_id = grant.admin_id(), "Locker status changed");
        self.audit.record(
            actions::ADMIN_LOCKER_STATUS_CHANGE,
            json!({ "locker_id": locker_id, "from": from, "to": target }),
            ctx,
        );
        Ok(saved)
    }

    async fn change_status(
        &self,
        locker_id: DbId,
        target: LockerStatus,
        ctx: &AuditContext,
    ) -> CoreResult<(LockerStatus, Locker)> {
        let mut locker = self.fetch(locker_id).await?;
        let from = locker.status;
        let saved = match target {
            LockerStatus::Free => self.free_locker(&mut locker, ctx).await?,
            LockerStatus::Occupied => self.relink_locker(&mut locker).await?,
            _ => {
                locker.transition_to(target)?;
                self.lockers.save(&locker).await?
            }
        };
        Ok((from, saved))
    }

    async fn free_locker(&self, locker: &mut Locker, ctx: &AuditContext) -> CoreResult<Locker> {
        let disputed = self
            .parcels
            .get_all_by_locker_and_status(locker.id, ParcelStatus::PickupDisputed)
            .await?;
        if let Some(parcel) = disputed.first() {
            return Err(CoreError::Conflict(format!(
                "Locker {} holds disputed parcel {}; resolve the dispute first",
                locker.id, parcel.id
            )));
        }
        let deposited = self
            .parcels
            .get_all_by_locker_and_status(locker.id, ParcelStatus::Deposited)
            .await?;
        if let Some(parcel) = deposited.first() {
            return Err(CoreError::Conflict(format!(
                "Locker {} still holds deposited parcel {}",
                locker.id, parcel.id
            )));
        }

        locker.transition_to(LockerStatus::Free)?;

        let mut missing = self
            .parcels
            .get_all_by_locker_and_status(locker.id, ParcelStatus::Missing)
            .await?;
        if missing.is_empty() {
            return self.lockers.save(locker).await;
        }

        let now = Utc::now();
        for parcel in &mut missing {
            parcel.detach(generate_reference_code(now));
        }
        self.parcels.save_with_locker(&missing, locker).await?;

        for parcel in &missing {
            tracing::info!(parcel_id = parcel.id, locker_id = locker.id, "Missing parcel detached");
            self.audit.record(
                actions::ADMIN_PARCEL_DETACHED,
                json!({
                    "parcel_id": parcel.id,
                    "locker_id": locker.id,
                    "reference_code": parcel.reference_code,
                }),
                ctx,
            );
        }
        self.fetch(locker.id).await
    }

    async fn relink_locker(&self, locker: &mut Locker) -> CoreResult<Locker> {
        if locker.status != LockerStatus::OutOfService {
            return Err(CoreError::InvalidTransition {
                entity: "locker",
                from: locker.status.to_string(),
                to: LockerStatus::Occupied.to_string(),
            });
        }
        let deposited = self
            .parcels
            .get_all_by_locker_and_status(locker.id, ParcelStatus::Deposited)
            .await?;
        if deposited.is_empty() {
            return Err(CoreError::Conflict(format!(
                "Locker {} has no deposited parcel to re-link",
                locker.id
            )));
        }
        locker.status = LockerStatus::Occupied;
        self.lockers.save(locker).await
    }

    /// Return a locker whose parcel has been physically collected to service.
    ///
    /// A locker in any other status is reported back, not treated as an error.
    pub async fn mark_emptied(&self, grant: &Grant, locker_id: DbId) -> CoreResult<EmptyOutcome> {
        crate::authority::require(&self.audit, grant, Permission::ManageLockers)?;
        let escalate = |e: CoreError| self.audit.escalate("mark_emptied", e, grant.context());
        let mut locker = self.fetch(locker_id).await.map_err(escalate)?;
        if locker.status != LockerStatus::AwaitingCollection {
            tracing::info!(locker_id, current = %locker.status, "Locker not awaiting collection");
            return Ok(EmptyOutcome::NotAwaitingCollection { current: locker.status });
        }

        locker.transition_to(LockerStatus::Free)?;
        let saved = self.lockers.save(&locker).await.map_err(escalate)?;
        self.audit.record(
            actions::ADMIN_LOCKER_EMPTIED,
            json!({ "locker_id": locker_id }),
            grant.context(),
        );
        Ok(EmptyOutcome::Emptied(saved))
    }

    /// Create lockers from configuration when none exist yet.
    ///
    /// Returns the lockers created, empty when the store already had some.
    pub async fn provision(&self, inputs: &[NewLocker]) -> CoreResult<Vec<Locker>> {
        let ctx = AuditContext::system();
        let escalate = |e: CoreError| self.audit.escalate("provision", e, &ctx);
        if inputs.is_empty() || !self.lockers.get_all().await.map_err(escalate)?.is_empty() {
            return Ok(Vec::new());
        }
        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
            let locker = self.lockers.create(input).await.map_err(escalate)?;
            self.audit.record(
                actions::SYSTEM_LOCKER_PROVISIONED,
                json!({ "locker_id": locker.id, "location": locker.location, "size": locker.size }),
                &ctx,
            );
            created.push(locker);
        }
        tracing::info!(count = created.len(), "Lockers provisioned");
        Ok(created)
    }

    /// Add a single locker on behalf of an admin.
    pub async fn create_locker(&self, grant: &Grant, input: &NewLocker) -> CoreResult<Locker> {
        crate::authority::require(&self.audit, grant, Permission::ManageLockers)?;
        if input.location.trim().is_empty() {
            return Err(CoreError::Validation("Locker location must not be empty".into()));
        }
        let locker = self
            .lockers
            .create(input)
            .await
            .map_err(|e| self.audit.escalate("create_locker", e, grant.context()))?;
        self.audit.record(
            actions::SYSTEM_LOCKER_PROVISIONED,
            json!({ "locker_id": locker.id, "location": locker.location, "size": locker.size }),
            grant.context(),
        );
        Ok(locker)
    }

    pub async fn list(&self) -> CoreResult<Vec<Locker>> {
        self.lockers
            .get_all()
            .await
            .map_err(|e| self.audit.escalate("list_lockers", e, &AuditContext::system()))
    }

    /// Locker counts for every status, zero-filled.
    pub async fn occupancy(&self) -> CoreResult<Vec<StatusCount>> {
        let counts = self
            .lockers
            .count_by_status()
            .await
            .map_err(|e| self.audit.escalate("locker_occupancy", e, &AuditContext::system()))?;
        Ok(LockerStatus::ALL
            .iter()
            .map(|status| StatusCount {
                status: *status,
                count: counts
                    .iter()
                    .find(|c| c.status == *status)
                    .map_or(0, |c| c.count),
            })
            .collect())
    }

    /// Active parcels still attached to `locker_id`. Store failures are left
    /// for the caller to escalate.
    pub(crate) async fn active_parcels(&self, locker_id: DbId) -> CoreResult<Vec<Parcel>> {
        let mut active = Vec::new();
        for status in lockerhub_core::parcel::ACTIVE_STATUSES {
            active.extend(
                self.parcels
                    .get_all_by_locker_and_status(locker_id, *status)
                    .await?,
            );
        }
        Ok(active)
    }
}

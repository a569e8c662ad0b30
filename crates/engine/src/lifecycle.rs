//! Parcel lifecycle: deposit, pickup, disputes, loss, overdue returns and
//! PIN re-issuance.
//!
//! Every operation re-reads the parcel, checks its current status, applies
//! the transition table and writes back with the version it read, so two
//! concurrent transitions on one parcel cannot both commit. Writes that touch
//! the parcel and its locker go through
//! [`ParcelStore::save_with_locker`] as one unit.

use std::sync::Arc;

use chrono::Utc;
use lockerhub_core::audit::{actions, AuditContext};
use lockerhub_core::config::{EngineConfig, PinConfig};
use lockerhub_core::credential::{self, CredentialManager};
use lockerhub_core::error::{CoreError, CoreResult};
use lockerhub_core::locker::{Locker, LockerSize, LockerStatus};
use lockerhub_core::notification::{NotificationData, NotificationKind};
use lockerhub_core::parcel::{generate_reference_code, NewParcel, Parcel, ParcelStatus};
use lockerhub_core::roles::Permission;
use lockerhub_core::store::{LockerStore, NotificationSender, ParcelStore};
use lockerhub_core::types::{DbId, Timestamp};
use lockerhub_core::validation::validate_email;
use serde::Serialize;
use serde_json::json;

use crate::allocator::LockerAllocator;
use crate::audit_trail::AuditTrail;
use crate::authority::{require, Grant};

/// Shown for a PIN that matches nothing collectable.
pub const INVALID_PIN_MESSAGE: &str = "Invalid PIN or no matching parcel found.";

/// Shown for a PIN that matches a parcel whose credential has lapsed.
pub const PIN_EXPIRED_MESSAGE: &str = "PIN has expired.";

/// Shown for an unknown or superseded self-service link.
pub const INVALID_REGENERATION_LINK: &str = "This PIN link is invalid or has been replaced.";

/// A completed deposit. The PIN itself has gone to the recipient.
#[derive(Debug, Clone)]
pub struct Deposit {
    pub parcel: Parcel,
    pub locker: Locker,
}

/// How an admin closes a pickup dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeOutcome {
    /// The recipient did collect the parcel.
    PickedUp,
    /// The parcel is lost.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverdueFailure {
    pub parcel_id: DbId,
    pub error: String,
}

/// What one overdue batch did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverdueReport {
    pub processed: Vec<DbId>,
    pub failed: Vec<OverdueFailure>,
}

impl OverdueReport {
    pub fn is_empty(&self) -> bool {
        self.processed.is_empty() && self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct ParcelLifecycle {
    allocator: LockerAllocator,
    lockers: Arc<dyn LockerStore>,
    parcels: Arc<dyn ParcelStore>,
    notifier: Arc<dyn NotificationSender>,
    audit: AuditTrail,
    credentials: CredentialManager,
    pin: PinConfig,
    max_pickup_days: i64,
}

impl ParcelLifecycle {
    pub fn new(
        allocator: LockerAllocator,
        lockers: Arc<dyn LockerStore>,
        parcels: Arc<dyn ParcelStore>,
        notifier: Arc<dyn NotificationSender>,
        audit: AuditTrail,
        config: &EngineConfig,
    ) -> CoreResult<Self> {
        Ok(Self {
            allocator,
            lockers,
            parcels,
            notifier,
            audit,
            credentials: CredentialManager::new(&config.pin.kdf)?,
            pin: config.pin.clone(),
            max_pickup_days: config.max_pickup_days,
        })
    }

    pub async fn get(&self, parcel_id: DbId) -> CoreResult<Parcel> {
        self.load(parcel_id, "get_parcel", &AuditContext::system()).await
    }

    // -----------------------------------------------------------------------
    // Recipient / sender flows
    // -----------------------------------------------------------------------

    /// Reserve a locker of `size`, create the parcel and send its PIN.
    pub async fn deposit(
        &self,
        recipient_email: &str,
        size: LockerSize,
        ctx: &AuditContext,
    ) -> CoreResult<Deposit> {
        validate_email(recipient_email)?;
        let pin = self
            .credentials
            .generate()
            .map_err(|e| self.audit.escalate("deposit", e, ctx))?;
        let now = Utc::now();
        let expires = credential::expiry_from_at(self.pin.expiry_hours, now);

        let Some(locker) = self.allocator.find_available(size, ctx).await? else {
            self.audit.record(
                actions::USER_DEPOSIT_FAIL_NO_CAPACITY,
                json!({ "size": size, "recipient_email": recipient_email }),
                ctx,
            );
            return Err(CoreError::NoCapacity { size: size.to_string() });
        };

        let input = NewParcel {
            locker_id: locker.id,
            recipient_email: recipient_email.to_string(),
            deposited_at: now,
            pin_hash: pin.hash.clone(),
            pin_expires_at: expires,
        };
        let parcel = match self.parcels.create(&input).await {
            Ok(parcel) => parcel,
            Err(e) => {
                self.release_reservation(locker).await;
                return Err(self.audit.escalate("deposit", e, ctx));
            }
        };

        tracing::info!(parcel_id = parcel.id, locker_id = locker.id, %size, "Parcel deposited");
        self.audit.record(
            actions::USER_DEPOSIT,
            json!({
                "parcel_id": parcel.id,
                "locker_id": locker.id,
                "size": size,
                "location": locker.location,
                "pin_expires_at": expires,
            }),
            ctx,
        );

        let data = NotificationData {
            parcel_id: parcel.id,
            locker_id: Some(locker.id),
            location: Some(locker.location.clone()),
            pin: Some(pin.plaintext),
            pin_expires_at: Some(expires),
            token: None,
        };
        self.notify(recipient_email, NotificationKind::PinIssued, &data, ctx).await;

        Ok(Deposit { parcel, locker })
    }

    /// Undo a reservation whose parcel could not be created.
    async fn release_reservation(&self, mut locker: Locker) {
        let locker_id = locker.id;
        let result = match locker.transition_to(LockerStatus::Free) {
            Ok(()) => self.lockers.save(&locker).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => tracing::warn!(locker_id, "Released locker after failed deposit"),
            Err(e) => {
                tracing::error!(locker_id, error = %e, "Failed to release locker after failed deposit")
            }
        }
    }

    /// Collect the parcel whose current PIN is `candidate_pin`.
    ///
    /// Only parcels in `deposited` are considered, so a retracted, disputed
    /// or returned parcel never validates even with a matching hash.
    pub async fn pickup(&self, candidate_pin: &str, ctx: &AuditContext) -> CoreResult<Parcel> {
        if !credential::is_valid_format(candidate_pin) {
            self.audit.record(
                actions::USER_PICKUP_FAIL_INVALID_PIN,
                json!({ "reason": "format" }),
                ctx,
            );
            return Err(CoreError::Validation(INVALID_PIN_MESSAGE.into()));
        }

        let candidates = self
            .parcels
            .get_by_status(ParcelStatus::Deposited)
            .await
            .map_err(|e| self.audit.escalate("pickup", e, ctx))?;
        let checked = candidates.len();

        let now = Utc::now();
        let mut expired_match = None;
        let mut matched = None;
        for parcel in candidates {
            let Some(stored) = parcel.pin_hash.as_deref() else {
                continue;
            };
            if !self.credentials.verify(stored, candidate_pin) {
                continue;
            }
            if credential::is_expired_at(parcel.pin_expires_at, now) {
                expired_match.get_or_insert(parcel.id);
                continue;
            }
            matched = Some(parcel);
            break;
        }

        let Some(mut parcel) = matched else {
            if let Some(parcel_id) = expired_match {
                self.audit.record(
                    actions::USER_PICKUP_FAIL_PIN_EXPIRED,
                    json!({ "parcel_id": parcel_id }),
                    ctx,
                );
                return Err(CoreError::Unauthorized(PIN_EXPIRED_MESSAGE.into()));
            }
            self.audit.record(
                actions::USER_PICKUP_FAIL_INVALID_PIN,
                json!({ "reason": "no_match", "candidates_checked": checked }),
                ctx,
            );
            return Err(CoreError::Unauthorized(INVALID_PIN_MESSAGE.into()));
        };

        parcel.transition_to(ParcelStatus::PickedUp)?;
        let locker = self.locker_of(&parcel, "pickup", ctx).await?.and_then(released);
        let saved = self
            .commit(&parcel, locker.as_ref())
            .await
            .map_err(|e| self.audit.escalate("pickup", e, ctx))?;

        tracing::info!(parcel_id = parcel.id, locker_id = ?parcel.locker_id, "Parcel picked up");
        self.audit.record(
            actions::USER_PICKUP,
            json!({ "parcel_id": parcel.id, "locker_id": parcel.locker_id }),
            ctx,
        );
        Ok(saved)
    }

    /// Sender takes a deposited parcel back.
    ///
    /// The locker returns to `free` unless it is out of service.
    pub async fn retract(&self, parcel_id: DbId, ctx: &AuditContext) -> CoreResult<Parcel> {
        let mut parcel = self.load(parcel_id, "retract", ctx).await?;
        parcel.require_status(&[ParcelStatus::Deposited])?;
        parcel.transition_to(ParcelStatus::RetractedBySender)?;

        let locker = self.locker_of(&parcel, "retract", ctx).await?.and_then(released);
        let saved = self
            .commit(&parcel, locker.as_ref())
            .await
            .map_err(|e| self.audit.escalate("retract", e, ctx))?;

        tracing::info!(parcel_id, "Deposit retracted by sender");
        self.audit.record(
            actions::USER_RETRACT_DEPOSIT,
            json!({ "parcel_id": parcel_id, "locker_id": parcel.locker_id }),
            ctx,
        );
        Ok(saved)
    }

    /// Recipient disputes a pickup they did not make.
    ///
    /// When the locker already serves another active parcel, or has been
    /// reserved for one, the disputed parcel is detached from it with a
    /// reference code. The locker is written back in the same unit so that
    /// a reservation landing in between fails the write; that case is
    /// retried once.
    pub async fn dispute_pickup(&self, parcel_id: DbId, ctx: &AuditContext) -> CoreResult<Parcel> {
        let (saved, original_locker) = match self.try_dispute(parcel_id).await {
            Err(CoreError::ConcurrencyConflict(reason)) => {
                tracing::debug!(parcel_id, %reason, "Locker changed during dispute, retrying");
                self.try_dispute(parcel_id).await
            }
            other => other,
        }
        .map_err(|e| self.audit.escalate("dispute_pickup", e, ctx))?;
        let detached = saved.locker_id.is_none() && original_locker.is_some();

        tracing::warn!(parcel_id, detached, "Pickup disputed");
        self.audit.record(
            actions::USER_DISPUTE_PICKUP,
            json!({ "parcel_id": parcel_id, "locker_id": original_locker }),
            ctx,
        );
        if detached {
            self.audit.record(
                actions::SYSTEM_DISPUTED_PARCEL_DETACHED,
                json!({
                    "parcel_id": parcel_id,
                    "locker_id": original_locker,
                    "reference_code": saved.reference_code,
                }),
                ctx,
            );
        }
        Ok(saved)
    }

    /// One dispute attempt. Returns the saved parcel and the locker it
    /// referenced before the dispute.
    async fn try_dispute(&self, parcel_id: DbId) -> CoreResult<(Parcel, Option<DbId>)> {
        let mut parcel = self.fetch(parcel_id).await?;
        parcel.require_status(&[ParcelStatus::PickedUp])?;
        parcel.transition_to(ParcelStatus::PickupDisputed)?;
        let original_locker = parcel.locker_id;

        let Some(locker) = self.fetch_locker(&parcel).await? else {
            return Ok((self.parcels.save(&parcel).await?, original_locker));
        };
        // Read the locker before its parcels: a reservation after this point
        // moves the locker's version and the write below fails.
        let taken = locker.status == LockerStatus::Occupied
            || !self.allocator.active_parcels(locker.id).await?.is_empty();
        if taken {
            parcel.detach(generate_reference_code(Utc::now()));
        }
        self.parcels
            .save_with_locker(std::slice::from_ref(&parcel), &locker)
            .await?;
        Ok((self.fetch(parcel_id).await?, original_locker))
    }

    /// Recipient reports a deposited parcel as not in its locker.
    ///
    /// The locker is taken out of service for inspection.
    pub async fn report_missing_by_recipient(
        &self,
        parcel_id: DbId,
        ctx: &AuditContext,
    ) -> CoreResult<Parcel> {
        let mut parcel = self.load(parcel_id, "report_missing", ctx).await?;
        parcel.require_status(&[ParcelStatus::Deposited])?;
        parcel.transition_to(ParcelStatus::Missing)?;

        let locker = self
            .locker_of(&parcel, "report_missing", ctx)
            .await?
            .and_then(taken_out_of_service);
        let saved = self
            .commit(&parcel, locker.as_ref())
            .await
            .map_err(|e| self.audit.escalate("report_missing", e, ctx))?;

        tracing::warn!(parcel_id, locker_id = ?parcel.locker_id, "Parcel reported missing by recipient");
        self.audit.record(
            actions::USER_REPORT_MISSING,
            json!({ "parcel_id": parcel_id, "locker_id": parcel.locker_id }),
            ctx,
        );
        Ok(saved)
    }

    // -----------------------------------------------------------------------
    // Admin operations
    // -----------------------------------------------------------------------

    /// Declare a deposited or disputed parcel lost.
    pub async fn mark_missing(&self, grant: &Grant, parcel_id: DbId) -> CoreResult<Parcel> {
        require(&self.audit, grant, Permission::MarkMissing)?;
        let mut parcel = self.load(parcel_id, "mark_missing", grant.context()).await?;
        parcel.require_status(&[ParcelStatus::Deposited, ParcelStatus::PickupDisputed])?;
        let previous = parcel.status;

        let saved = self.lose(&mut parcel, grant.context()).await?;
        self.audit.record(
            actions::ADMIN_MARK_MISSING,
            json!({
                "parcel_id": parcel_id,
                "locker_id": parcel.locker_id,
                "previous_status": previous,
            }),
            grant.context(),
        );
        Ok(saved)
    }

    /// Close a pickup dispute.
    pub async fn resolve_dispute(
        &self,
        grant: &Grant,
        parcel_id: DbId,
        outcome: DisputeOutcome,
    ) -> CoreResult<Parcel> {
        require(&self.audit, grant, Permission::MarkMissing)?;
        let mut parcel = self.load(parcel_id, "resolve_dispute", grant.context()).await?;
        parcel.require_status(&[ParcelStatus::PickupDisputed])?;

        let saved = match outcome {
            DisputeOutcome::PickedUp => {
                parcel.transition_to(ParcelStatus::PickedUp)?;
                self.parcels
                    .save(&parcel)
                    .await
                    .map_err(|e| self.audit.escalate("resolve_dispute", e, grant.context()))?
            }
            DisputeOutcome::Missing => self.lose(&mut parcel, grant.context()).await?,
        };

        tracing::info!(parcel_id, outcome = ?outcome, "Pickup dispute resolved");
        self.audit.record(
            actions::ADMIN_RESOLVE_DISPUTE,
            json!({ "parcel_id": parcel_id, "outcome": saved.status }),
            grant.context(),
        );
        Ok(saved)
    }

    /// Move to `missing` and take the locker out of service.
    async fn lose(&self, parcel: &mut Parcel, ctx: &AuditContext) -> CoreResult<Parcel> {
        parcel.transition_to(ParcelStatus::Missing)?;
        let locker = self
            .locker_of(parcel, "mark_missing", ctx)
            .await?
            .and_then(taken_out_of_service);
        self.commit(parcel, locker.as_ref())
            .await
            .map_err(|e| self.audit.escalate("mark_missing", e, ctx))
    }

    /// Finish a return for a parcel in `expired` or `awaiting_return`.
    pub async fn complete_return(&self, grant: &Grant, parcel_id: DbId) -> CoreResult<Parcel> {
        require(&self.audit, grant, Permission::ProcessOverdue)?;
        let mut parcel = self.load(parcel_id, "complete_return", grant.context()).await?;
        parcel.require_status(&[ParcelStatus::Expired, ParcelStatus::AwaitingReturn])?;
        let previous = parcel.status;
        parcel.transition_to(ParcelStatus::ReturnToSender)?;

        let saved = self
            .parcels
            .save(&parcel)
            .await
            .map_err(|e| self.audit.escalate("complete_return", e, grant.context()))?;
        self.audit.record(
            actions::ADMIN_COMPLETE_RETURN,
            json!({ "parcel_id": parcel_id, "previous_status": previous }),
            grant.context(),
        );
        Ok(saved)
    }

    /// Replace the PIN of a deposited parcel. The old PIN stops working at once.
    pub async fn reissue_pin(&self, grant: &Grant, parcel_id: DbId) -> CoreResult<Parcel> {
        require(&self.audit, grant, Permission::ReissuePin)?;
        let mut parcel = self.load(parcel_id, "reissue_pin", grant.context()).await?;
        parcel.require_status(&[ParcelStatus::Deposited])?;

        let pin = self
            .credentials
            .generate()
            .map_err(|e| self.audit.escalate("reissue_pin", e, grant.context()))?;
        let expires = credential::expiry_from(self.pin.expiry_hours);
        parcel.pin_hash = Some(pin.hash.clone());
        parcel.pin_expires_at = Some(expires);

        let saved = self
            .parcels
            .save(&parcel)
            .await
            .map_err(|e| self.audit.escalate("reissue_pin", e, grant.context()))?;

        tracing::info!(parcel_id, admin_id = grant.admin_id(), "PIN reissued");
        self.audit.record(
            actions::PIN_REISSUE,
            json!({ "parcel_id": parcel_id, "pin_expires_at": expires }),
            grant.context(),
        );
        let data = self.pin_notification(&saved, pin.plaintext, expires).await;
        self.notify(&saved.recipient_email, NotificationKind::PinReissued, &data, grant.context())
            .await;
        Ok(saved)
    }

    // -----------------------------------------------------------------------
    // Self-service regeneration
    // -----------------------------------------------------------------------

    /// Send a fresh regeneration link, replacing any previous one and
    /// opening a new generation window.
    pub async fn issue_generation_token(&self, parcel_id: DbId, ctx: &AuditContext) -> CoreResult<()> {
        let mut parcel = self.load(parcel_id, "issue_generation_token", ctx).await?;
        parcel.require_status(&[ParcelStatus::Deposited])?;

        let token = credential::generate_generation_token();
        parcel.generation_token_hash = Some(token.hash);
        parcel.pin_generation_count = 0;
        parcel.last_pin_generation_at = None;

        let saved = self
            .parcels
            .save(&parcel)
            .await
            .map_err(|e| self.audit.escalate("issue_generation_token", e, ctx))?;

        self.audit.record(
            actions::PIN_GENERATION_TOKEN_ISSUED,
            json!({ "parcel_id": parcel_id }),
            ctx,
        );
        let data = NotificationData {
            parcel_id,
            locker_id: saved.locker_id,
            token: Some(token.plaintext),
            ..Default::default()
        };
        self.notify(&saved.recipient_email, NotificationKind::GenerationToken, &data, ctx)
            .await;
        Ok(())
    }

    /// Issue a new PIN through a self-service link.
    ///
    /// Refused once the link has produced the configured number of PINs; only
    /// a new link resets the count.
    pub async fn regenerate_pin(&self, token: &str, ctx: &AuditContext) -> CoreResult<Parcel> {
        let hash = credential::hash_generation_token(token);
        let found = self
            .parcels
            .get_by_generation_token_hash(&hash)
            .await
            .map_err(|e| self.audit.escalate("regenerate_pin", e, ctx))?;
        let Some(mut parcel) = found else {
            self.audit.record(
                actions::PIN_REGENERATION_INVALID_TOKEN,
                json!({ "reason": "unknown_token" }),
                ctx,
            );
            return Err(CoreError::Unauthorized(INVALID_REGENERATION_LINK.into()));
        };
        parcel.require_status(&[ParcelStatus::Deposited])?;

        let max = self.pin.max_generations_per_day;
        if parcel.pin_generation_count >= max {
            tracing::warn!(parcel_id = parcel.id, count = parcel.pin_generation_count, "PIN regeneration rate limited");
            self.audit.record(
                actions::PIN_REGENERATION_RATE_LIMITED,
                json!({
                    "parcel_id": parcel.id,
                    "generation_count": parcel.pin_generation_count,
                    "max_per_window": max,
                }),
                ctx,
            );
            return Err(CoreError::RateLimited(format!(
                "A new PIN can be requested at most {max} times per link"
            )));
        }

        let pin = self
            .credentials
            .generate()
            .map_err(|e| self.audit.escalate("regenerate_pin", e, ctx))?;
        let now = Utc::now();
        let expires = credential::expiry_from_at(self.pin.expiry_hours, now);
        parcel.pin_hash = Some(pin.hash.clone());
        parcel.pin_expires_at = Some(expires);
        parcel.pin_generation_count += 1;
        parcel.last_pin_generation_at = Some(now);

        let saved = self
            .parcels
            .save(&parcel)
            .await
            .map_err(|e| self.audit.escalate("regenerate_pin", e, ctx))?;

        self.audit.record(
            actions::PIN_REGENERATION,
            json!({
                "parcel_id": saved.id,
                "generation_count": saved.pin_generation_count,
                "pin_expires_at": expires,
            }),
            ctx,
        );
        let data = self.pin_notification(&saved, pin.plaintext, expires).await;
        self.notify(&saved.recipient_email, NotificationKind::PinRegenerated, &data, ctx)
            .await;
        Ok(saved)
    }

    // -----------------------------------------------------------------------
    // Overdue batch
    // -----------------------------------------------------------------------

    /// Return every parcel that has waited longer than the configured window.
    pub async fn process_overdue(&self, ctx: &AuditContext) -> CoreResult<OverdueReport> {
        self.process_overdue_at(self.max_pickup_days, Utc::now(), ctx).await
    }

    /// Return every deposited parcel older than `max_pickup_days` at `now`.
    ///
    /// Each parcel is its own unit: a failure is audited and reported, and
    /// the batch moves on.
    pub async fn process_overdue_at(
        &self,
        max_pickup_days: i64,
        now: Timestamp,
        ctx: &AuditContext,
    ) -> CoreResult<OverdueReport> {
        let deposited = self
            .parcels
            .get_by_status(ParcelStatus::Deposited)
            .await
            .map_err(|e| self.audit.escalate("process_overdue", e, ctx))?;

        let mut report = OverdueReport::default();
        for parcel in deposited
            .into_iter()
            .filter(|p| p.is_overdue(max_pickup_days, now))
        {
            let parcel_id = parcel.id;
            match self.return_overdue(parcel, now, ctx).await {
                Ok(()) => report.processed.push(parcel_id),
                Err(e) => {
                    let e = self.audit.escalate("process_overdue", e, ctx);
                    tracing::error!(parcel_id, error = %e, "Overdue return failed");
                    self.audit.record(
                        actions::OVERDUE_PROCESSING_FAIL,
                        json!({ "parcel_id": parcel_id, "error": e.to_string() }),
                        ctx,
                    );
                    report.failed.push(OverdueFailure { parcel_id, error: e.to_string() });
                }
            }
        }

        if !report.is_empty() {
            tracing::info!(
                processed = report.processed.len(),
                failed = report.failed.len(),
                "Overdue batch complete"
            );
            let failed_ids: Vec<DbId> = report.failed.iter().map(|f| f.parcel_id).collect();
            self.audit.record(
                actions::SYSTEM_OVERDUE_BATCH_COMPLETE,
                json!({
                    "processed": report.processed.len(),
                    "failed": report.failed.len(),
                    "failed_parcel_ids": failed_ids,
                    "max_pickup_days": max_pickup_days,
                }),
                ctx,
            );
        }
        Ok(report)
    }

    async fn return_overdue(&self, mut parcel: Parcel, now: Timestamp, ctx: &AuditContext) -> CoreResult<()> {
        parcel.transition_to(ParcelStatus::ReturnToSender)?;
        let locker = self.fetch_locker(&parcel).await?.and_then(awaiting_collection);
        self.commit(&parcel, locker.as_ref()).await?;

        let days_waiting = (now - parcel.deposited_at).num_days();
        self.audit.record(
            actions::SYSTEM_OVERDUE_RETURN,
            json!({
                "parcel_id": parcel.id,
                "locker_id": parcel.locker_id,
                "days_waiting": days_waiting,
                "locker_blocked": locker.is_some(),
            }),
            ctx,
        );
        let data = NotificationData {
            parcel_id: parcel.id,
            locker_id: parcel.locker_id,
            ..Default::default()
        };
        self.notify(&parcel.recipient_email, NotificationKind::ParcelReturned, &data, ctx)
            .await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn fetch(&self, parcel_id: DbId) -> CoreResult<Parcel> {
        self.parcels
            .get_by_id(parcel_id)
            .await?
            .ok_or(CoreError::NotFound { entity: "parcel", id: parcel_id })
    }

    async fn load(&self, parcel_id: DbId, operation: &str, ctx: &AuditContext) -> CoreResult<Parcel> {
        self.fetch(parcel_id)
            .await
            .map_err(|e| self.audit.escalate(operation, e, ctx))
    }

    async fn fetch_locker(&self, parcel: &Parcel) -> CoreResult<Option<Locker>> {
        match parcel.locker_id {
            Some(id) => self.lockers.get_by_id(id).await,
            None => Ok(None),
        }
    }

    async fn locker_of(
        &self,
        parcel: &Parcel,
        operation: &str,
        ctx: &AuditContext,
    ) -> CoreResult<Option<Locker>> {
        self.fetch_locker(parcel)
            .await
            .map_err(|e| self.audit.escalate(operation, e, ctx))
    }

    /// Write the parcel, and the locker when it changed, in one unit.
    async fn commit(&self, parcel: &Parcel, locker: Option<&Locker>) -> CoreResult<Parcel> {
        match locker {
            None => self.parcels.save(parcel).await,
            Some(locker) => {
                self.parcels
                    .save_with_locker(std::slice::from_ref(parcel), locker)
                    .await?;
                self.fetch(parcel.id).await
            }
        }
    }

    async fn pin_notification(&self, parcel: &Parcel, pin: String, expires: Timestamp) -> NotificationData {
        let location = match self.fetch_locker(parcel).await {
            Ok(locker) => locker.map(|l| l.location),
            Err(_) => None,
        };
        NotificationData {
            parcel_id: parcel.id,
            locker_id: parcel.locker_id,
            location,
            pin: Some(pin),
            pin_expires_at: Some(expires),
            token: None,
        }
    }

    /// Deliver a notification; failure is audited, never propagated.
    async fn notify(
        &self,
        recipient: &str,
        kind: NotificationKind,
        data: &NotificationData,
        ctx: &AuditContext,
    ) {
        if let Err(e) = self.notifier.send(recipient, kind, data).await {
            tracing::warn!(parcel_id = data.parcel_id, %kind, error = %e, "Notification failed");
            self.audit.record(
                actions::NOTIFICATION_SEND_FAIL,
                json!({ "parcel_id": data.parcel_id, "kind": kind, "error": e.to_string() }),
                ctx,
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Locker side effects
// ---------------------------------------------------------------------------

/// The locker after its parcel leaves, or `None` if it stays as it is.
/// An out-of-service locker is never put back into service here.
fn released(mut locker: Locker) -> Option<Locker> {
    if locker.status == LockerStatus::OutOfService || locker.status == LockerStatus::Free {
        return None;
    }
    locker.transition_to(LockerStatus::Free).ok()?;
    Some(locker)
}

fn taken_out_of_service(mut locker: Locker) -> Option<Locker> {
    locker.transition_to(LockerStatus::OutOfService).ok()?;
    Some(locker)
}

/// Block a locker whose parcel went back to the sender until it is emptied.
fn awaiting_collection(mut locker: Locker) -> Option<Locker> {
    if locker.status == LockerStatus::Free {
        return None;
    }
    locker.transition_to(LockerStatus::AwaitingCollection).ok()?;
    Some(locker)
}

//! In-memory collaborator implementations.
//!
//! Used by the engine's tests and for running the engine without a
//! database. All three stores share one mutex so that multi-entity writes
//! and locker reservation are atomic in the same way a database transaction
//! makes them.
//!
//! Fault injection and raw overwrites are only compiled for tests and under
//! the `test-util` feature.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use lockerhub_core::admin::{AdminUser, NewAdminUser};
use lockerhub_core::audit::{
    compute_integrity_hash, verify_chain, AuditEvent, IntegrityCheckResult, StoredAuditEvent,
};
use lockerhub_core::error::{CoreError, CoreResult};
use lockerhub_core::locker::{Locker, LockerSize, LockerStatus, NewLocker, StatusCount};
use lockerhub_core::notification::{NotificationData, NotificationKind};
use lockerhub_core::parcel::{NewParcel, Parcel, ParcelStatus};
use lockerhub_core::store::{AdminStore, AuditSink, LockerStore, NotificationSender, ParcelStore};
use lockerhub_core::types::DbId;

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

#[derive(Default)]
struct State {
    next_id: DbId,
    lockers: BTreeMap<DbId, Locker>,
    parcels: BTreeMap<DbId, Parcel>,
    admins: BTreeMap<DbId, AdminUser>,
    failing_parcels: HashSet<DbId>,
}

impl State {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn has_active_parcel(&self, locker_id: DbId) -> bool {
        self.parcels
            .values()
            .any(|p| p.locker_id == Some(locker_id) && p.status.is_active())
    }

    fn check_locker(&self, locker: &Locker) -> CoreResult<()> {
        let stored = self.lockers.get(&locker.id).ok_or(CoreError::NotFound {
            entity: "locker",
            id: locker.id,
        })?;
        if stored.version != locker.version {
            return Err(CoreError::ConcurrencyConflict(format!(
                "locker {} changed since it was read",
                locker.id
            )));
        }
        Ok(())
    }

    fn check_parcel(&self, parcel: &Parcel) -> CoreResult<()> {
        if self.failing_parcels.contains(&parcel.id) {
            return Err(CoreError::Persistence(format!(
                "write of parcel {} failed",
                parcel.id
            )));
        }
        let stored = self.parcels.get(&parcel.id).ok_or(CoreError::NotFound {
            entity: "parcel",
            id: parcel.id,
        })?;
        if stored.version != parcel.version {
            return Err(CoreError::ConcurrencyConflict(format!(
                "parcel {} changed since it was read",
                parcel.id
            )));
        }
        Ok(())
    }

    fn put_locker(&mut self, locker: &Locker) -> Locker {
        let mut next = locker.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        self.lockers.insert(next.id, next.clone());
        next
    }

    fn put_parcel(&mut self, parcel: &Parcel) -> Parcel {
        let mut next = parcel.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        self.parcels.insert(next.id, next.clone());
        next
    }
}

/// Lockers, parcels and admins behind a single lock.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_next_parcel_create: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| CoreError::Internal("memory store lock poisoned".into()))
    }

    /// Make the next parcel insert fail with a persistence error.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_next_parcel_create(&self) {
        self.fail_next_parcel_create.store(true, Ordering::SeqCst);
    }

    /// Make every write touching `parcel_id` fail with a persistence error.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_writes_for_parcel(&self, parcel_id: DbId) {
        if let Ok(mut state) = self.lock() {
            state.failing_parcels.insert(parcel_id);
        }
    }

    /// Overwrite a parcel as-is, bypassing version checks.
    #[cfg(any(test, feature = "test-util"))]
    pub fn put_parcel_raw(&self, parcel: Parcel) {
        if let Ok(mut state) = self.lock() {
            state.parcels.insert(parcel.id, parcel);
        }
    }

    /// Overwrite a locker as-is, bypassing version checks.
    #[cfg(any(test, feature = "test-util"))]
    pub fn put_locker_raw(&self, locker: Locker) {
        if let Ok(mut state) = self.lock() {
            state.lockers.insert(locker.id, locker);
        }
    }
}

#[async_trait]
impl LockerStore for MemoryStore {
    async fn get_by_id(&self, id: DbId) -> CoreResult<Option<Locker>> {
        Ok(self.lock()?.lockers.get(&id).cloned())
    }

    async fn reserve_free_by_size(&self, size: LockerSize) -> CoreResult<Option<Locker>> {
        let mut state = self.lock()?;
        let candidate = state
            .lockers
            .values()
            .find(|l| {
                l.size == size && l.status == LockerStatus::Free && !state.has_active_parcel(l.id)
            })
            .cloned();
        Ok(candidate.map(|mut locker| {
            locker.status = LockerStatus::Occupied;
            state.put_locker(&locker)
        }))
    }

    async fn save(&self, locker: &Locker) -> CoreResult<Locker> {
        let mut state = self.lock()?;
        state.check_locker(locker)?;
        Ok(state.put_locker(locker))
    }

    async fn get_all(&self) -> CoreResult<Vec<Locker>> {
        Ok(self.lock()?.lockers.values().cloned().collect())
    }

    async fn count_by_status(&self) -> CoreResult<Vec<StatusCount>> {
        let state = self.lock()?;
        let mut counts: BTreeMap<&'static str, StatusCount> = BTreeMap::new();
        for locker in state.lockers.values() {
            counts
                .entry(locker.status.as_str())
                .or_insert(StatusCount { status: locker.status, count: 0 })
                .count += 1;
        }
        Ok(counts.into_values().collect())
    }

    async fn create(&self, input: &NewLocker) -> CoreResult<Locker> {
        let mut state = self.lock()?;
        let now = Utc::now();
        let locker = Locker {
            id: state.next_id(),
            location: input.location.clone(),
            size: input.size,
            status: LockerStatus::Free,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        state.lockers.insert(locker.id, locker.clone());
        Ok(locker)
    }
}

#[async_trait]
impl ParcelStore for MemoryStore {
    async fn get_by_id(&self, id: DbId) -> CoreResult<Option<Parcel>> {
        Ok(self.lock()?.parcels.get(&id).cloned())
    }

    async fn get_all_by_locker_and_status(
        &self,
        locker_id: DbId,
        status: ParcelStatus,
    ) -> CoreResult<Vec<Parcel>> {
        Ok(self
            .lock()?
            .parcels
            .values()
            .filter(|p| p.locker_id == Some(locker_id) && p.status == status)
            .cloned()
            .collect())
    }

    async fn get_by_status(&self, status: ParcelStatus) -> CoreResult<Vec<Parcel>> {
        let mut parcels: Vec<Parcel> = self
            .lock()?
            .parcels
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        parcels.sort_by_key(|p| (p.deposited_at, p.id));
        Ok(parcels)
    }

    async fn get_by_generation_token_hash(&self, hash: &str) -> CoreResult<Option<Parcel>> {
        Ok(self
            .lock()?
            .parcels
            .values()
            .find(|p| p.generation_token_hash.as_deref() == Some(hash))
            .cloned())
    }

    async fn create(&self, input: &NewParcel) -> CoreResult<Parcel> {
        if self.fail_next_parcel_create.swap(false, Ordering::SeqCst) {
            return Err(CoreError::Persistence("parcel insert failed".into()));
        }
        let mut state = self.lock()?;
        let parcel = Parcel {
            id: state.next_id(),
            locker_id: Some(input.locker_id),
            recipient_email: input.recipient_email.clone(),
            status: ParcelStatus::Deposited,
            deposited_at: input.deposited_at,
            pin_hash: Some(input.pin_hash.clone()),
            pin_expires_at: Some(input.pin_expires_at),
            pin_generation_count: 0,
            last_pin_generation_at: None,
            generation_token_hash: None,
            reference_code: None,
            version: 0,
            updated_at: Utc::now(),
        };
        state.parcels.insert(parcel.id, parcel.clone());
        Ok(parcel)
    }

    async fn save(&self, parcel: &Parcel) -> CoreResult<Parcel> {
        let mut state = self.lock()?;
        state.check_parcel(parcel)?;
        Ok(state.put_parcel(parcel))
    }

    async fn save_all(&self, parcels: &[Parcel]) -> CoreResult<()> {
        let mut state = self.lock()?;
        for parcel in parcels {
            state.check_parcel(parcel)?;
        }
        for parcel in parcels {
            state.put_parcel(parcel);
        }
        Ok(())
    }

    async fn save_with_locker(&self, parcels: &[Parcel], locker: &Locker) -> CoreResult<()> {
        let mut state = self.lock()?;
        state.check_locker(locker)?;
        for parcel in parcels {
            state.check_parcel(parcel)?;
        }
        state.put_locker(locker);
        for parcel in parcels {
            state.put_parcel(parcel);
        }
        Ok(())
    }
}

#[async_trait]
impl AdminStore for MemoryStore {
    async fn get_by_username(&self, username: &str) -> CoreResult<Option<AdminUser>> {
        Ok(self
            .lock()?
            .admins
            .values()
            .find(|a| a.username == username)
            .cloned())
    }

    async fn get_by_id(&self, id: DbId) -> CoreResult<Option<AdminUser>> {
        Ok(self.lock()?.admins.get(&id).cloned())
    }

    async fn create(&self, input: &NewAdminUser) -> CoreResult<AdminUser> {
        let mut state = self.lock()?;
        if state.admins.values().any(|a| a.username == input.username) {
            return Err(CoreError::Conflict(format!(
                "Username '{}' is already taken",
                input.username
            )));
        }
        let user = AdminUser {
            id: state.next_id(),
            username: input.username.clone(),
            password_hash: input.password_hash.clone(),
            role: input.role,
            created_at: Utc::now(),
            last_login: None,
        };
        state.admins.insert(user.id, user.clone());
        Ok(user)
    }

    async fn save(&self, user: &AdminUser) -> CoreResult<()> {
        let mut state = self.lock()?;
        if !state.admins.contains_key(&user.id) {
            return Err(CoreError::NotFound { entity: "admin_user", id: user.id });
        }
        state.admins.insert(user.id, user.clone());
        Ok(())
    }

    async fn count(&self) -> CoreResult<i64> {
        Ok(self.lock()?.admins.len() as i64)
    }
}

// ---------------------------------------------------------------------------
// Audit sink
// ---------------------------------------------------------------------------

/// Append-only audit log that chains integrity hashes like the database sink.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<StoredAuditEvent>>,
    refusing: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every hand-off, as a closed channel would.
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<StoredAuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event.action).collect()
    }

    pub fn count(&self, action: &str) -> usize {
        self.events().iter().filter(|e| e.event.action == action).count()
    }

    /// Most recent event with `action`.
    pub fn last(&self, action: &str) -> Option<AuditEvent> {
        self.events()
            .into_iter()
            .rev()
            .find(|e| e.event.action == action)
            .map(|e| e.event)
    }

    pub fn verify(&self) -> IntegrityCheckResult {
        verify_chain(None, &self.events())
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, event: AuditEvent) -> CoreResult<()> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(CoreError::Internal("audit sink is closed".into()));
        }
        let mut events = self
            .events
            .lock()
            .map_err(|_| CoreError::Internal("audit sink lock poisoned".into()))?;
        let prev = events.last().map(|e| e.integrity_hash.as_str());
        let integrity_hash = compute_integrity_hash(prev, &event.canonical_data());
        let id = events.len() as DbId + 1;
        events.push(StoredAuditEvent { id, event, integrity_hash });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub recipient: String,
    pub kind: NotificationKind,
    pub data: NotificationData,
}

/// Notification sender that keeps every message in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Plaintext PIN from the latest message for `parcel_id` that carried one.
    pub fn last_pin(&self, parcel_id: DbId) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .filter(|n| n.data.parcel_id == parcel_id)
            .find_map(|n| n.data.pin)
    }

    /// Plaintext token from the latest message for `parcel_id` that carried one.
    pub fn last_token(&self, parcel_id: DbId) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .filter(|n| n.data.parcel_id == parcel_id)
            .find_map(|n| n.data.token)
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(
        &self,
        recipient: &str,
        kind: NotificationKind,
        data: &NotificationData,
    ) -> CoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::Delivery(format!("{kind} to {recipient} bounced")));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| CoreError::Internal("notifier lock poisoned".into()))?;
        sent.push(SentNotification {
            recipient: recipient.to_string(),
            kind,
            data: data.clone(),
        });
        Ok(())
    }
}

//! Locker allocation and parcel lifecycle services.
//!
//! [`Engine`] wires the three services over one set of collaborators:
//! [`LockerAllocator`](allocator::LockerAllocator),
//! [`ParcelLifecycle`](lifecycle::ParcelLifecycle) and
//! [`AdminAuthority`](authority::AdminAuthority). All of them record through
//! the same [`AuditTrail`](audit_trail::AuditTrail).

use std::sync::Arc;

use lockerhub_core::config::EngineConfig;
use lockerhub_core::error::CoreResult;
use lockerhub_core::store::{AdminStore, AuditSink, LockerStore, NotificationSender, ParcelStore};

pub mod allocator;
pub mod audit_trail;
pub mod authority;
pub mod lifecycle;
pub mod memory;
pub mod password;
pub mod session_token;

use allocator::LockerAllocator;
use audit_trail::AuditTrail;
use authority::AdminAuthority;
use lifecycle::ParcelLifecycle;

/// External collaborators the engine runs on.
#[derive(Clone)]
pub struct Collaborators {
    pub lockers: Arc<dyn LockerStore>,
    pub parcels: Arc<dyn ParcelStore>,
    pub admins: Arc<dyn AdminStore>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn NotificationSender>,
}

#[derive(Clone)]
pub struct Engine {
    pub allocator: LockerAllocator,
    pub lifecycle: ParcelLifecycle,
    pub authority: AdminAuthority,
    pub config: Arc<EngineConfig>,
}

impl Engine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> CoreResult<Self> {
        let audit = AuditTrail::new(collaborators.audit);
        let allocator = LockerAllocator::new(
            collaborators.lockers.clone(),
            collaborators.parcels.clone(),
            audit.clone(),
        );
        let lifecycle = ParcelLifecycle::new(
            allocator.clone(),
            collaborators.lockers,
            collaborators.parcels,
            collaborators.notifier,
            audit.clone(),
            &config,
        )?;
        let authority = AdminAuthority::new(collaborators.admins, audit, config.session.clone());

        Ok(Self {
            allocator,
            lifecycle,
            authority,
            config: Arc::new(config),
        })
    }
}

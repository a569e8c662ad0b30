#![allow(dead_code)]

use std::sync::Arc;

use lockerhub_core::admin::CreateAdminUser;
use lockerhub_core::audit::AuditContext;
use lockerhub_core::config::{EngineConfig, KdfParams};
use lockerhub_core::locker::{Locker, LockerSize, NewLocker};
use lockerhub_core::parcel::Parcel;
use lockerhub_core::roles::{Permission, Role};
use lockerhub_core::store::{LockerStore, ParcelStore};
use lockerhub_core::types::DbId;
use lockerhub_engine::authority::Grant;
use lockerhub_engine::lifecycle::Deposit;
use lockerhub_engine::memory::{MemoryAuditSink, MemoryStore, RecordingNotifier};
use lockerhub_engine::{Collaborators, Engine};

pub const SUPER_USERNAME: &str = "root_admin";
pub const SUPER_PASSWORD: &str = "root-password-123";
pub const STAFF_PASSWORD: &str = "staff-password-123";

/// Engine over in-memory collaborators, with handles to inspect them.
pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub notifier: Arc<RecordingNotifier>,
}

/// Defaults everywhere except the cheapest PIN KDF.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::new("test-session-secret-that-is-long-enough");
    config.pin.kdf = KdfParams::minimal();
    config
}

pub async fn harness(lockers: &[(&str, LockerSize)]) -> Harness {
    harness_with(test_config(), lockers).await
}

pub async fn harness_with(config: EngineConfig, lockers: &[(&str, LockerSize)]) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let notifier = Arc::new(RecordingNotifier::new());

    for (location, size) in lockers {
        LockerStore::create(
            store.as_ref(),
            &NewLocker { location: location.to_string(), size: *size },
        )
        .await
        .unwrap();
    }

    let engine = Engine::new(
        config,
        Collaborators {
            lockers: store.clone(),
            parcels: store.clone(),
            admins: store.clone(),
            audit: audit.clone(),
            notifier: notifier.clone(),
        },
    )
    .unwrap();

    Harness { engine, store, audit, notifier }
}

pub fn ctx() -> AuditContext {
    AuditContext::system().with_ip("10.1.2.3")
}

impl Harness {
    pub async fn deposit(&self, email: &str, size: LockerSize) -> (Deposit, String) {
        let deposit = self.engine.lifecycle.deposit(email, size, &ctx()).await.unwrap();
        let pin = self.notifier.last_pin(deposit.parcel.id).unwrap();
        (deposit, pin)
    }

    pub async fn parcel(&self, id: DbId) -> Parcel {
        ParcelStore::get_by_id(self.store.as_ref(), id).await.unwrap().unwrap()
    }

    pub async fn locker(&self, id: DbId) -> Locker {
        LockerStore::get_by_id(self.store.as_ref(), id).await.unwrap().unwrap()
    }

    /// Log in as `role` (creating the account on first use) and authorize
    /// `permission`.
    pub async fn grant(&self, role: Role, permission: Permission) -> Grant {
        let token = self.login(role).await;
        self.engine
            .authority
            .authorize(&token, permission, &ctx())
            .await
            .unwrap()
    }

    /// Session token for an account with `role`.
    pub async fn login(&self, role: Role) -> String {
        let authority = &self.engine.authority;
        authority
            .bootstrap_super_admin(SUPER_USERNAME, SUPER_PASSWORD)
            .await
            .unwrap();

        let (username, password) = match role {
            Role::SuperAdmin => (SUPER_USERNAME.to_string(), SUPER_PASSWORD),
            other => (format!("{other}_staff"), STAFF_PASSWORD),
        };

        if role != Role::SuperAdmin {
            let root = authority
                .authenticate(SUPER_USERNAME, SUPER_PASSWORD, &ctx())
                .await
                .unwrap();
            let grant = authority
                .authorize(&root.token, Permission::ManageAdmins, &ctx())
                .await
                .unwrap();
            let request = CreateAdminUser {
                username: username.clone(),
                password: password.to_string(),
                role,
            };
            // Ignore the conflict when the account already exists.
            let _ = authority.create_admin(&grant, &request).await;
        }

        authority
            .authenticate(&username, password, &ctx())
            .await
            .unwrap()
            .token
    }
}

//! Admin roles and the fixed role -> permission table.
//!
//! Role text must match the `ck_admin_users_role` check constraint in
//! `20260301000003_create_admin_users.sql`.

use crate::error::{CoreError, CoreResult};

define_str_enum! {
    Role("role") {
        Admin = "admin",
        SuperAdmin = "super_admin",
        Maintenance = "maintenance",
    }
}

define_str_enum! {
    /// Action tags checked by the admin authority.
    Permission("permission") {
        ViewParcels = "view_parcels",
        MarkMissing = "mark_missing",
        ReissuePin = "reissue_pin",
        ManageLockers = "manage_lockers",
        ViewAudit = "view_audit",
        ProcessOverdue = "process_overdue",
        ManageAdmins = "manage_admins",
        SystemConfig = "system_config",
    }
}

const ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::ViewParcels,
    Permission::MarkMissing,
    Permission::ReissuePin,
    Permission::ManageLockers,
    Permission::ViewAudit,
    Permission::ProcessOverdue,
];

const SUPER_ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::ViewParcels,
    Permission::MarkMissing,
    Permission::ReissuePin,
    Permission::ManageLockers,
    Permission::ViewAudit,
    Permission::ProcessOverdue,
    Permission::ManageAdmins,
    Permission::SystemConfig,
];

const MAINTENANCE_PERMISSIONS: &[Permission] = &[Permission::ManageLockers, Permission::ViewAudit];

impl Role {
    pub fn permissions(self) -> &'static [Permission] {
        match self {
            Role::Admin => ADMIN_PERMISSIONS,
            Role::SuperAdmin => SUPER_ADMIN_PERMISSIONS,
            Role::Maintenance => MAINTENANCE_PERMISSIONS,
        }
    }

    pub fn allows(self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

/// Resolve a stored role name. Unknown names are an error, never an empty
/// permission set.
pub fn parse_role(name: &str) -> CoreResult<Role> {
    name.parse().map_err(|_| {
        CoreError::Internal(format!("Admin record carries unknown role '{name}'"))
    })
}

//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument. Versioned updates take any
//! executor so they can run inside a caller's transaction.

pub mod admin_user_repo;
pub mod audit_repo;
pub mod locker_repo;
pub mod parcel_repo;

pub use admin_user_repo::AdminUserRepo;
pub use audit_repo::AuditLogRepo;
pub use locker_repo::LockerRepo;
pub use parcel_repo::ParcelRepo;

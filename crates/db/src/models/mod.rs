//! Database row structs.
//!
//! Each submodule contains a `FromRow` struct matching the table row, with
//! enum columns kept as text, and a `TryFrom` conversion into the core type
//! that parses them.

pub mod admin_user;
pub mod audit;
pub mod locker;
pub mod parcel;

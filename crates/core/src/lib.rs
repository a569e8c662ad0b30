//! Domain core for the campus locker service.
//!
//! This crate has no internal dependencies. It holds the rules that every
//! other crate builds on: credential handling, audit classification, the
//! locker and parcel status machines, role permissions, configuration, and
//! the collaborator traits that storage and delivery adapters implement.

#[macro_use]
mod macros;

pub mod admin;
pub mod audit;
pub mod config;
pub mod credential;
pub mod error;
pub mod hashing;
pub mod locker;
pub mod notification;
pub mod parcel;
pub mod roles;
pub mod store;
pub mod types;
pub mod validation;

//! Out-of-band delivery for the locker engine.
//!
//! - [`ChannelAuditSink`] hands audit events to a background task without
//!   blocking the caller.
//! - [`AuditPersistence`] drains that channel into the `audit_logs` hash
//!   chain and can verify the chain afterwards.
//! - [`delivery`] holds the notification senders (SMTP and log-only).

pub mod audit;
pub mod delivery;
pub mod persistence;

pub use audit::ChannelAuditSink;
pub use delivery::email::{EmailConfig, EmailDelivery};
pub use delivery::log_only::LogOnlySender;
pub use persistence::AuditPersistence;

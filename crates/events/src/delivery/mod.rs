//! Notification senders.
//!
//! The engine hands over a semantic payload; everything about the wire
//! format lives here, starting with [`template::render`].

pub mod email;
pub mod log_only;
pub mod template;

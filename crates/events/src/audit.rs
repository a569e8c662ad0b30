//! Channel-backed [`AuditSink`].
//!
//! Appending only enqueues the event; [`AuditPersistence`](crate::AuditPersistence)
//! owns the receiving end and does the database work.

use lockerhub_core::audit::AuditEvent;
use lockerhub_core::error::{CoreError, CoreResult};
use lockerhub_core::store::AuditSink;
use tokio::sync::mpsc;

/// Sending half of the audit pipeline. Cheap to clone.
#[derive(Clone)]
pub struct ChannelAuditSink {
    sender: mpsc::UnboundedSender<AuditEvent>,
}

impl ChannelAuditSink {
    /// Create a sink and the receiver the persistence task should drain.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl AuditSink for ChannelAuditSink {
    fn append(&self, event: AuditEvent) -> CoreResult<()> {
        self.sender
            .send(event)
            .map_err(|e| CoreError::Internal(format!("audit channel closed, dropped {}", e.0.action)))
    }
}

//! Notification sender for deployments without SMTP.
//!
//! Records that a notification would have gone out. The PIN and token
//! never reach the log.

use async_trait::async_trait;
use lockerhub_core::error::CoreResult;
use lockerhub_core::notification::{NotificationData, NotificationKind};
use lockerhub_core::store::NotificationSender;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlySender;

#[async_trait]
impl NotificationSender for LogOnlySender {
    async fn send(
        &self,
        recipient: &str,
        kind: NotificationKind,
        data: &NotificationData,
    ) -> CoreResult<()> {
        tracing::info!(
            recipient,
            kind = %kind,
            parcel_id = data.parcel_id,
            locker_id = ?data.locker_id,
            has_pin = data.pin.is_some(),
            "Notification not delivered: SMTP is not configured"
        );
        Ok(())
    }
}

//! Semantic notification payloads. Wire formatting belongs to the sender.

use serde::Serialize;

use crate::types::{DbId, Timestamp};

define_str_enum! {
    NotificationKind("notification kind") {
        /// First PIN after a deposit.
        PinIssued = "pin_issued",
        /// Admin-initiated replacement PIN.
        PinReissued = "pin_reissued",
        /// Self-service replacement PIN.
        PinRegenerated = "pin_regenerated",
        /// Self-service regeneration link.
        GenerationToken = "generation_token",
        /// Parcel sent back after the pickup window.
        ParcelReturned = "parcel_returned",
    }
}

/// What a notification says. `pin` and `token` are plaintext and exist only
/// in memory on the way to the sender.
#[derive(Clone, Default, Serialize)]
pub struct NotificationData {
    pub parcel_id: DbId,
    pub locker_id: Option<DbId>,
    pub location: Option<String>,
    pub pin: Option<String>,
    pub pin_expires_at: Option<Timestamp>,
    pub token: Option<String>,
}

impl std::fmt::Debug for NotificationData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationData")
            .field("parcel_id", &self.parcel_id)
            .field("locker_id", &self.locker_id)
            .field("location", &self.location)
            .field("pin", &self.pin.as_ref().map(|_| "[REDACTED]"))
            .field("pin_expires_at", &self.pin_expires_at)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

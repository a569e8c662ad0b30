//! Plain-text message templates for recipient notifications.

use chrono::SecondsFormat;
use lockerhub_core::notification::{NotificationData, NotificationKind};

const SUBJECT_PREFIX: &str = "[LockerHub]";

/// A rendered notification, ready for any text transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Render `kind` with `data`.
///
/// `regeneration_url` is the page a generation token is appended to as a
/// `token` query parameter.
pub fn render(kind: NotificationKind, data: &NotificationData, regeneration_url: &str) -> RenderedMessage {
    let parcel = data.parcel_id;
    let (subject, lead) = match kind {
        NotificationKind::PinIssued => (
            format!("{SUBJECT_PREFIX} Your parcel {parcel} is ready for pickup"),
            "A parcel is waiting for you.".to_string(),
        ),
        NotificationKind::PinReissued => (
            format!("{SUBJECT_PREFIX} New pickup PIN for parcel {parcel}"),
            "Your pickup PIN was replaced by staff. The previous PIN no longer works.".to_string(),
        ),
        NotificationKind::PinRegenerated => (
            format!("{SUBJECT_PREFIX} New pickup PIN for parcel {parcel}"),
            "You requested a new pickup PIN. The previous PIN no longer works.".to_string(),
        ),
        NotificationKind::GenerationToken => (
            format!("{SUBJECT_PREFIX} Get a new PIN for parcel {parcel}"),
            "Use the link below to generate a new pickup PIN.".to_string(),
        ),
        NotificationKind::ParcelReturned => (
            format!("{SUBJECT_PREFIX} Parcel {parcel} was returned to sender"),
            "Your parcel was not collected in time and is being returned to the sender.".to_string(),
        ),
    };

    let mut lines = vec![lead, String::new()];
    if let Some(location) = &data.location {
        lines.push(format!("Location: {location}"));
    }
    if let Some(locker_id) = data.locker_id {
        lines.push(format!("Locker: {locker_id}"));
    }
    if let Some(pin) = &data.pin {
        lines.push(format!("PIN: {pin}"));
    }
    if let Some(expires) = data.pin_expires_at {
        lines.push(format!(
            "PIN valid until: {}",
            expires.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    if let Some(token) = &data.token {
        let separator = if regeneration_url.contains('?') { '&' } else { '?' };
        lines.push(format!("{regeneration_url}{separator}token={token}"));
    }

    RenderedMessage {
        subject,
        body: lines.join("\n"),
    }
}

//! Parcel statuses, the parcel status machine, and parcel entities.

use chrono::Duration;
use rand::Rng;
use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::types::{DbId, Timestamp, Version};

define_str_enum! {
    /// Lifecycle status of a parcel.
    ParcelStatus("parcel status") {
        Deposited = "deposited",
        PickedUp = "picked_up",
        Missing = "missing",
        Expired = "expired",
        RetractedBySender = "retracted_by_sender",
        PickupDisputed = "pickup_disputed",
        AwaitingReturn = "awaiting_return",
        ReturnToSender = "return_to_sender",
    }
}

/// Statuses in which a parcel still lays claim to its locker.
pub const ACTIVE_STATUSES: &[ParcelStatus] = &[ParcelStatus::Deposited, ParcelStatus::PickupDisputed];

// ---------------------------------------------------------------------------
// Status transitions
// ---------------------------------------------------------------------------

impl ParcelStatus {
    /// Returns the set of statuses this status may transition to.
    ///
    /// Terminal states (`missing`, `retracted_by_sender`, `return_to_sender`)
    /// return an empty slice.
    pub fn valid_transitions(self) -> &'static [ParcelStatus] {
        use ParcelStatus::*;
        match self {
            Deposited => &[PickedUp, Missing, RetractedBySender, ReturnToSender, PickupDisputed],
            PickedUp => &[PickupDisputed],
            PickupDisputed => &[Missing, PickedUp],
            Expired => &[ReturnToSender],
            AwaitingReturn => &[ReturnToSender],
            Missing | RetractedBySender | ReturnToSender => &[],
        }
    }

    pub fn can_transition(self, to: ParcelStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.valid_transitions().is_empty()
    }

    pub fn is_active(self) -> bool {
        ACTIVE_STATUSES.contains(&self)
    }
}

/// Validate that a parcel status transition from `current` to `next` is allowed.
pub fn validate_transition(current: ParcelStatus, next: ParcelStatus) -> CoreResult<()> {
    if current.can_transition(next) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            entity: "parcel",
            from: current.to_string(),
            to: next.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A deposit record. Never deleted; terminal states are kept for history.
///
/// `pin_hash` holds `salt:digest` material only. The plaintext PIN is never
/// stored. `generation_token_hash` is the SHA-256 of the self-service token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parcel {
    pub id: DbId,
    pub locker_id: Option<DbId>,
    pub recipient_email: String,
    pub status: ParcelStatus,
    pub deposited_at: Timestamp,
    #[serde(skip_serializing)]
    pub pin_hash: Option<String>,
    pub pin_expires_at: Option<Timestamp>,
    pub pin_generation_count: i32,
    pub last_pin_generation_at: Option<Timestamp>,
    #[serde(skip_serializing)]
    pub generation_token_hash: Option<String>,
    pub reference_code: Option<String>,
    pub version: Version,
    pub updated_at: Timestamp,
}

impl Parcel {
    /// Apply a table-validated status change in place.
    pub fn transition_to(&mut self, next: ParcelStatus) -> CoreResult<()> {
        validate_transition(self.status, next)?;
        self.status = next;
        Ok(())
    }

    /// Fail with [`CoreError::InvalidState`] unless the parcel is in one of `expected`.
    pub fn require_status(&self, expected: &[ParcelStatus]) -> CoreResult<()> {
        if expected.contains(&self.status) {
            return Ok(());
        }
        Err(CoreError::InvalidState {
            entity: "Parcel",
            id: self.id,
            current: self.status.to_string(),
            expected: expected
                .iter()
                .map(|s| format!("'{s}'"))
                .collect::<Vec<_>>()
                .join(" or "),
        })
    }

    /// Whether the parcel has sat in its locker longer than `max_days`.
    pub fn is_overdue(&self, max_days: i64, now: Timestamp) -> bool {
        now - self.deposited_at > Duration::days(max_days)
    }

    /// Drop the locker reference and stamp a reference code for follow-up.
    pub fn detach(&mut self, reference_code: String) {
        self.locker_id = None;
        self.reference_code = Some(reference_code);
    }
}

/// DTO for inserting a freshly deposited parcel.
#[derive(Debug, Clone)]
pub struct NewParcel {
    pub locker_id: DbId,
    pub recipient_email: String,
    pub deposited_at: Timestamp,
    pub pin_hash: String,
    pub pin_expires_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Reference codes
// ---------------------------------------------------------------------------

/// Characters used in reference codes (no 0/O or 1/I look-alikes).
const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of the random suffix of a reference code.
const REFERENCE_SUFFIX_LEN: usize = 6;

/// Generate a reference code for a parcel detached from its locker,
/// e.g. `MP-20261017-7KQ2ZD`.
pub fn generate_reference_code(now: Timestamp) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..REFERENCE_SUFFIX_LEN)
        .map(|_| {
            let idx = rng.random_range(0..REFERENCE_ALPHABET.len());
            char::from(REFERENCE_ALPHABET[idx])
        })
        .collect();
    format!("MP-{}-{suffix}", now.format("%Y%m%d"))
}

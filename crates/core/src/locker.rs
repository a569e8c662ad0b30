//! Locker sizes, statuses and the locker status machine.
//!
//! The transition table here is the only authority on which status changes
//! are legal. Business guards that need to look at parcels (dispute checks,
//! missing-parcel detachment) live in the allocator service on top of it.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{DbId, Timestamp, Version};

define_str_enum! {
    /// Physical compartment size.
    LockerSize("locker size") {
        Small = "small",
        Medium = "medium",
        Large = "large",
    }
}

define_str_enum! {
    /// Operational status of a locker.
    LockerStatus("locker status") {
        Free = "free",
        Occupied = "occupied",
        OutOfService = "out_of_service",
        DisputedContents = "disputed_contents",
        AwaitingCollection = "awaiting_collection",
    }
}

// ---------------------------------------------------------------------------
// Status transitions
// ---------------------------------------------------------------------------

impl LockerStatus {
    /// Returns the set of statuses this status may transition to.
    ///
    /// - `free`                -> `occupied`, `out_of_service`
    /// - `occupied`            -> `free`, `out_of_service`, `disputed_contents`, `awaiting_collection`
    /// - `out_of_service`      -> `free`
    /// - `disputed_contents`   -> `out_of_service`, `free`
    /// - `awaiting_collection` -> `free`, `out_of_service`
    pub fn valid_transitions(self) -> &'static [LockerStatus] {
        use LockerStatus::*;
        match self {
            Free => &[Occupied, OutOfService],
            Occupied => &[Free, OutOfService, DisputedContents, AwaitingCollection],
            OutOfService => &[Free],
            DisputedContents => &[OutOfService, Free],
            AwaitingCollection => &[Free, OutOfService],
        }
    }

    pub fn can_transition(self, to: LockerStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

/// Validate that a locker status transition from `current` to `next` is allowed.
pub fn validate_transition(current: LockerStatus, next: LockerStatus) -> CoreResult<()> {
    if current.can_transition(next) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            entity: "locker",
            from: current.to_string(),
            to: next.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A physical locker. Never deleted, only status-mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locker {
    pub id: DbId,
    pub location: String,
    pub size: LockerSize,
    pub status: LockerStatus,
    pub version: Version,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Locker {
    /// Apply a table-validated status change in place.
    pub fn transition_to(&mut self, next: LockerStatus) -> CoreResult<()> {
        validate_transition(self.status, next)?;
        self.status = next;
        Ok(())
    }
}

/// DTO for provisioning a new locker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewLocker {
    pub location: String,
    pub size: LockerSize,
}

/// Locker count for one status, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: LockerStatus,
    pub count: i64,
}

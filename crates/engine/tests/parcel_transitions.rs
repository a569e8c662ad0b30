mod common;

use assert_matches::assert_matches;
use common::{ctx, harness};
use lockerhub_core::audit::actions;
use lockerhub_core::error::CoreError;
use lockerhub_core::locker::{LockerSize, LockerStatus};
use lockerhub_core::notification::NotificationKind;
use lockerhub_core::parcel::ParcelStatus;
use lockerhub_core::roles::{Permission, Role};
use lockerhub_engine::lifecycle::{DisputeOutcome, INVALID_REGENERATION_LINK};

// ---------------------------------------------------------------------------
// Disputes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispute_requires_a_picked_up_parcel() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;

    let err = h
        .engine
        .lifecycle
        .dispute_pickup(deposit.parcel.id, &ctx())
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::InvalidState { ref current, .. } if current == "deposited");
    assert!(err.to_string().contains("deposited"));
}

#[tokio::test]
async fn dispute_keeps_the_parcel_on_an_idle_locker() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, pin) = h.deposit("student@campus.edu", LockerSize::Small).await;
    h.engine.lifecycle.pickup(&pin, &ctx()).await.unwrap();

    let disputed = h
        .engine
        .lifecycle
        .dispute_pickup(deposit.parcel.id, &ctx())
        .await
        .unwrap();
    assert_eq!(disputed.status, ParcelStatus::PickupDisputed);
    assert_eq!(disputed.locker_id, Some(deposit.locker.id));
    assert_eq!(disputed.reference_code, None);
    assert_eq!(h.audit.count(actions::USER_DISPUTE_PICKUP), 1);
    assert_eq!(h.audit.count(actions::SYSTEM_DISPUTED_PARCEL_DETACHED), 0);
}

#[tokio::test]
async fn disputed_parcel_blocks_its_locker_until_resolved() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, pin) = h.deposit("student@campus.edu", LockerSize::Small).await;
    h.engine.lifecycle.pickup(&pin, &ctx()).await.unwrap();
    h.engine.lifecycle.dispute_pickup(deposit.parcel.id, &ctx()).await.unwrap();

    // Free on paper, but not allocatable while the dispute is open.
    assert_eq!(h.locker(deposit.locker.id).await.status, LockerStatus::Free);
    assert_matches!(
        h.engine.lifecycle.deposit("next@campus.edu", LockerSize::Small, &ctx()).await,
        Err(CoreError::NoCapacity { .. })
    );

    let grant = h.grant(Role::Admin, Permission::MarkMissing).await;
    let resolved = h
        .engine
        .lifecycle
        .resolve_dispute(&grant, deposit.parcel.id, DisputeOutcome::PickedUp)
        .await
        .unwrap();
    assert_eq!(resolved.status, ParcelStatus::PickedUp);

    let (next, _) = h.deposit("next@campus.edu", LockerSize::Small).await;
    assert_eq!(next.locker.id, deposit.locker.id);
}

#[tokio::test]
async fn dispute_detaches_parcel_when_locker_was_reused() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (first, pin) = h.deposit("first@campus.edu", LockerSize::Small).await;
    h.engine.lifecycle.pickup(&pin, &ctx()).await.unwrap();
    let (second, _) = h.deposit("second@campus.edu", LockerSize::Small).await;
    assert_eq!(second.locker.id, first.locker.id);

    let disputed = h
        .engine
        .lifecycle
        .dispute_pickup(first.parcel.id, &ctx())
        .await
        .unwrap();
    assert_eq!(disputed.status, ParcelStatus::PickupDisputed);
    assert_eq!(disputed.locker_id, None);
    let code = disputed.reference_code.clone().unwrap();
    assert!(code.starts_with("MP-"));

    let detached = h.audit.last(actions::SYSTEM_DISPUTED_PARCEL_DETACHED).unwrap();
    assert_eq!(detached.details["reference_code"], code.as_str());
    assert_eq!(detached.details["locker_id"], first.locker.id);

    // The other parcel and its locker are untouched.
    assert_eq!(h.parcel(second.parcel.id).await.status, ParcelStatus::Deposited);
    assert_eq!(h.locker(first.locker.id).await.status, LockerStatus::Occupied);
}

#[tokio::test]
async fn resolving_a_dispute_as_missing_takes_locker_out_of_service() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, pin) = h.deposit("student@campus.edu", LockerSize::Small).await;
    h.engine.lifecycle.pickup(&pin, &ctx()).await.unwrap();
    h.engine.lifecycle.dispute_pickup(deposit.parcel.id, &ctx()).await.unwrap();

    let grant = h.grant(Role::Admin, Permission::MarkMissing).await;
    let resolved = h
        .engine
        .lifecycle
        .resolve_dispute(&grant, deposit.parcel.id, DisputeOutcome::Missing)
        .await
        .unwrap();

    assert_eq!(resolved.status, ParcelStatus::Missing);
    assert_eq!(h.locker(deposit.locker.id).await.status, LockerStatus::OutOfService);
    let event = h.audit.last(actions::ADMIN_RESOLVE_DISPUTE).unwrap();
    assert_eq!(event.details["outcome"], "missing");
    assert_eq!(event.admin_id, Some(grant.admin_id()));
}

#[tokio::test]
async fn resolving_an_undisputed_parcel_is_rejected() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;
    let grant = h.grant(Role::Admin, Permission::MarkMissing).await;

    assert_matches!(
        h.engine
            .lifecycle
            .resolve_dispute(&grant, deposit.parcel.id, DisputeOutcome::PickedUp)
            .await,
        Err(CoreError::InvalidState { .. })
    );
}

// ---------------------------------------------------------------------------
// Missing and retracted
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recipient_report_takes_locker_out_of_service() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;

    let parcel = h
        .engine
        .lifecycle
        .report_missing_by_recipient(deposit.parcel.id, &ctx())
        .await
        .unwrap();
    assert_eq!(parcel.status, ParcelStatus::Missing);
    assert_eq!(h.locker(deposit.locker.id).await.status, LockerStatus::OutOfService);
    assert_eq!(h.audit.count(actions::USER_REPORT_MISSING), 1);
}

#[tokio::test]
async fn report_missing_after_pickup_is_rejected() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, pin) = h.deposit("student@campus.edu", LockerSize::Small).await;
    h.engine.lifecycle.pickup(&pin, &ctx()).await.unwrap();

    let err = h
        .engine
        .lifecycle
        .report_missing_by_recipient(deposit.parcel.id, &ctx())
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::InvalidState { ref current, .. } if current == "picked_up");
    assert_eq!(h.locker(deposit.locker.id).await.status, LockerStatus::Free);
}

#[tokio::test]
async fn admin_marks_deposited_parcel_missing() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, pin) = h.deposit("student@campus.edu", LockerSize::Small).await;
    let grant = h.grant(Role::Admin, Permission::MarkMissing).await;

    let parcel = h
        .engine
        .lifecycle
        .mark_missing(&grant, deposit.parcel.id)
        .await
        .unwrap();
    assert_eq!(parcel.status, ParcelStatus::Missing);
    assert_eq!(h.locker(deposit.locker.id).await.status, LockerStatus::OutOfService);

    let event = h.audit.last(actions::ADMIN_MARK_MISSING).unwrap();
    assert_eq!(event.details["previous_status"], "deposited");
    assert_eq!(event.details["admin_id"], grant.admin_id());

    // A missing parcel no longer answers to its PIN.
    assert_matches!(
        h.engine.lifecycle.pickup(&pin, &ctx()).await,
        Err(CoreError::Unauthorized(_))
    );
}

#[tokio::test]
async fn maintenance_cannot_mark_parcels_missing() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;
    let grant = h.grant(Role::Maintenance, Permission::ManageLockers).await;

    assert_matches!(
        h.engine.lifecycle.mark_missing(&grant, deposit.parcel.id).await,
        Err(CoreError::Forbidden(_))
    );
    assert_eq!(h.parcel(deposit.parcel.id).await.status, ParcelStatus::Deposited);
    let denied = h.audit.last(actions::ADMIN_PERMISSION_DENIED).unwrap();
    assert_eq!(denied.details["action"], "mark_missing");
    assert_eq!(denied.details["role"], "maintenance");
}

#[tokio::test]
async fn retract_frees_the_locker() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;

    let parcel = h.engine.lifecycle.retract(deposit.parcel.id, &ctx()).await.unwrap();
    assert_eq!(parcel.status, ParcelStatus::RetractedBySender);
    assert_eq!(h.locker(deposit.locker.id).await.status, LockerStatus::Free);
    assert_eq!(h.audit.count(actions::USER_RETRACT_DEPOSIT), 1);
}

#[tokio::test]
async fn retract_leaves_an_out_of_service_locker_alone() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;
    let grant = h.grant(Role::Maintenance, Permission::ManageLockers).await;
    h.engine
        .allocator
        .set_status(&grant, deposit.locker.id, LockerStatus::OutOfService)
        .await
        .unwrap();

    h.engine.lifecycle.retract(deposit.parcel.id, &ctx()).await.unwrap();
    assert_eq!(h.locker(deposit.locker.id).await.status, LockerStatus::OutOfService);
}

#[tokio::test]
async fn retract_twice_is_rejected() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;
    h.engine.lifecycle.retract(deposit.parcel.id, &ctx()).await.unwrap();

    assert_matches!(
        h.engine.lifecycle.retract(deposit.parcel.id, &ctx()).await,
        Err(CoreError::InvalidState { .. })
    );
}

#[tokio::test]
async fn unknown_parcel_is_not_found() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    assert_matches!(
        h.engine.lifecycle.retract(999, &ctx()).await,
        Err(CoreError::NotFound { entity: "parcel", id: 999 })
    );
}

// ---------------------------------------------------------------------------
// Returns
// ---------------------------------------------------------------------------

#[tokio::test]
async fn complete_return_from_expired() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;
    let mut parcel = h.parcel(deposit.parcel.id).await;
    parcel.status = ParcelStatus::Expired;
    h.store.put_parcel_raw(parcel);

    let grant = h.grant(Role::Admin, Permission::ProcessOverdue).await;
    let returned = h
        .engine
        .lifecycle
        .complete_return(&grant, deposit.parcel.id)
        .await
        .unwrap();
    assert_eq!(returned.status, ParcelStatus::ReturnToSender);
    let event = h.audit.last(actions::ADMIN_COMPLETE_RETURN).unwrap();
    assert_eq!(event.details["previous_status"], "expired");
}

#[tokio::test]
async fn complete_return_rejects_deposited_parcel() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;
    let grant = h.grant(Role::Admin, Permission::ProcessOverdue).await;

    assert_matches!(
        h.engine.lifecycle.complete_return(&grant, deposit.parcel.id).await,
        Err(CoreError::InvalidState { .. })
    );
}

// ---------------------------------------------------------------------------
// PIN re-issue and regeneration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reissued_pin_replaces_the_old_one() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, old_pin) = h.deposit("student@campus.edu", LockerSize::Small).await;
    let grant = h.grant(Role::Admin, Permission::ReissuePin).await;

    h.engine.lifecycle.reissue_pin(&grant, deposit.parcel.id).await.unwrap();
    let new_pin = h.notifier.last_pin(deposit.parcel.id).unwrap();
    let last = h.notifier.sent().pop().unwrap();
    assert_eq!(last.kind, NotificationKind::PinReissued);
    assert_eq!(h.audit.count(actions::PIN_REISSUE), 1);

    if new_pin != old_pin {
        assert_matches!(
            h.engine.lifecycle.pickup(&old_pin, &ctx()).await,
            Err(CoreError::Unauthorized(_))
        );
    }
    let parcel = h.engine.lifecycle.pickup(&new_pin, &ctx()).await.unwrap();
    assert_eq!(parcel.id, deposit.parcel.id);
}

#[tokio::test]
async fn reissue_for_collected_parcel_is_rejected() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, pin) = h.deposit("student@campus.edu", LockerSize::Small).await;
    h.engine.lifecycle.pickup(&pin, &ctx()).await.unwrap();
    let grant = h.grant(Role::Admin, Permission::ReissuePin).await;

    assert_matches!(
        h.engine.lifecycle.reissue_pin(&grant, deposit.parcel.id).await,
        Err(CoreError::InvalidState { .. })
    );
}

#[tokio::test]
async fn regeneration_is_limited_per_link() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;
    let lifecycle = &h.engine.lifecycle;

    lifecycle.issue_generation_token(deposit.parcel.id, &ctx()).await.unwrap();
    let token = h.notifier.last_token(deposit.parcel.id).unwrap();

    for expected in 1..=3 {
        let parcel = lifecycle.regenerate_pin(&token, &ctx()).await.unwrap();
        assert_eq!(parcel.pin_generation_count, expected);
    }
    assert_matches!(
        lifecycle.regenerate_pin(&token, &ctx()).await,
        Err(CoreError::RateLimited(_))
    );
    let limited = h.audit.last(actions::PIN_REGENERATION_RATE_LIMITED).unwrap();
    assert_eq!(limited.details["generation_count"], 3);

    // The latest regenerated PIN is the one that opens the locker.
    let pin = h.notifier.last_pin(deposit.parcel.id).unwrap();
    lifecycle.pickup(&pin, &ctx()).await.unwrap();
}

#[tokio::test]
async fn new_link_resets_the_count_and_retires_the_old_one() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;
    let lifecycle = &h.engine.lifecycle;

    lifecycle.issue_generation_token(deposit.parcel.id, &ctx()).await.unwrap();
    let old_token = h.notifier.last_token(deposit.parcel.id).unwrap();
    for _ in 0..3 {
        lifecycle.regenerate_pin(&old_token, &ctx()).await.unwrap();
    }

    lifecycle.issue_generation_token(deposit.parcel.id, &ctx()).await.unwrap();
    let new_token = h.notifier.last_token(deposit.parcel.id).unwrap();
    assert_ne!(new_token, old_token);
    assert_eq!(h.parcel(deposit.parcel.id).await.pin_generation_count, 0);

    let err = lifecycle.regenerate_pin(&old_token, &ctx()).await.unwrap_err();
    assert_matches!(err, CoreError::Unauthorized(ref msg) if msg == INVALID_REGENERATION_LINK);
    assert_eq!(h.audit.count(actions::PIN_REGENERATION_INVALID_TOKEN), 1);

    let parcel = lifecycle.regenerate_pin(&new_token, &ctx()).await.unwrap();
    assert_eq!(parcel.pin_generation_count, 1);
}

#[tokio::test]
async fn generation_token_never_reaches_the_audit_log() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;
    h.engine
        .lifecycle
        .issue_generation_token(deposit.parcel.id, &ctx())
        .await
        .unwrap();
    let token = h.notifier.last_token(deposit.parcel.id).unwrap();

    for stored in h.audit.events() {
        assert!(!stored.event.details.to_string().contains(&token));
    }
}

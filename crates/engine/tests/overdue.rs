mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use common::{ctx, harness};
use lockerhub_core::audit::{actions, AuditContext};
use lockerhub_core::locker::{LockerSize, LockerStatus};
use lockerhub_core::notification::NotificationKind;
use lockerhub_core::parcel::ParcelStatus;
use lockerhub_core::roles::{Permission, Role};
use lockerhub_engine::allocator::EmptyOutcome;

#[tokio::test]
async fn parcel_past_the_window_goes_back_to_sender() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, pin) = h.deposit("student@campus.edu", LockerSize::Small).await;
    let now = deposit.parcel.deposited_at + Duration::days(8);

    let report = h
        .engine
        .lifecycle
        .process_overdue_at(7, now, &AuditContext::system())
        .await
        .unwrap();

    assert_eq!(report.processed, vec![deposit.parcel.id]);
    assert!(report.failed.is_empty());
    assert_eq!(h.parcel(deposit.parcel.id).await.status, ParcelStatus::ReturnToSender);
    assert_eq!(h.locker(deposit.locker.id).await.status, LockerStatus::AwaitingCollection);

    let returned = h.audit.last(actions::SYSTEM_OVERDUE_RETURN).unwrap();
    assert_eq!(returned.details["days_waiting"], 8);
    assert_eq!(returned.details["locker_blocked"], true);
    let batch = h.audit.last(actions::SYSTEM_OVERDUE_BATCH_COMPLETE).unwrap();
    assert_eq!(batch.details["processed"], 1);
    assert_eq!(batch.details["failed"], 0);

    let last = h.notifier.sent().pop().unwrap();
    assert_eq!(last.kind, NotificationKind::ParcelReturned);
    assert_eq!(last.recipient, "student@campus.edu");

    // The old PIN no longer collects anything.
    assert!(h.engine.lifecycle.pickup(&pin, &ctx()).await.is_err());
}

#[tokio::test]
async fn exactly_at_the_window_is_not_overdue() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;
    let now = deposit.parcel.deposited_at + Duration::days(7);

    let report = h
        .engine
        .lifecycle
        .process_overdue_at(7, now, &AuditContext::system())
        .await
        .unwrap();
    assert!(report.is_empty());
    assert_eq!(h.parcel(deposit.parcel.id).await.status, ParcelStatus::Deposited);
    assert_eq!(h.audit.count(actions::SYSTEM_OVERDUE_BATCH_COMPLETE), 0);
}

#[tokio::test]
async fn fresh_deposits_survive_the_scheduled_run() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;

    let report = h.engine.lifecycle.process_overdue(&AuditContext::system()).await.unwrap();
    assert!(report.is_empty());
    assert_eq!(h.parcel(deposit.parcel.id).await.status, ParcelStatus::Deposited);
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let h = harness(&[("Bay 1", LockerSize::Small), ("Bay 2", LockerSize::Small)]).await;
    let (first, _) = h.deposit("a@campus.edu", LockerSize::Small).await;
    let (_, _) = h.deposit("b@campus.edu", LockerSize::Small).await;
    let now = first.parcel.deposited_at + Duration::days(10);
    let lifecycle = &h.engine.lifecycle;

    let report = lifecycle.process_overdue_at(7, now, &AuditContext::system()).await.unwrap();
    assert_eq!(report.processed.len(), 2);
    let events_after_first = h.audit.events().len();
    let notifications_after_first = h.notifier.sent().len();

    let again = lifecycle.process_overdue_at(7, now, &AuditContext::system()).await.unwrap();
    assert!(again.is_empty());
    assert_eq!(h.audit.events().len(), events_after_first);
    assert_eq!(h.notifier.sent().len(), notifications_after_first);
    assert_eq!(h.audit.count(actions::SYSTEM_OVERDUE_RETURN), 2);
}

#[tokio::test]
async fn one_failing_parcel_does_not_stop_the_batch() {
    let h = harness(&[("Bay 1", LockerSize::Small), ("Bay 2", LockerSize::Small)]).await;
    let (stuck, _) = h.deposit("a@campus.edu", LockerSize::Small).await;
    let (fine, _) = h.deposit("b@campus.edu", LockerSize::Small).await;
    h.store.fail_writes_for_parcel(stuck.parcel.id);
    let now = stuck.parcel.deposited_at + Duration::days(9);

    let report = h
        .engine
        .lifecycle
        .process_overdue_at(7, now, &AuditContext::system())
        .await
        .unwrap();

    assert_eq!(report.processed, vec![fine.parcel.id]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].parcel_id, stuck.parcel.id);

    assert_eq!(h.parcel(stuck.parcel.id).await.status, ParcelStatus::Deposited);
    assert_eq!(h.locker(stuck.locker.id).await.status, LockerStatus::Occupied);
    assert_eq!(h.parcel(fine.parcel.id).await.status, ParcelStatus::ReturnToSender);

    let failure = h.audit.last(actions::OVERDUE_PROCESSING_FAIL).unwrap();
    assert_eq!(failure.details["parcel_id"], stuck.parcel.id);
    let batch = h.audit.last(actions::SYSTEM_OVERDUE_BATCH_COMPLETE).unwrap();
    assert_eq!(batch.details["failed_parcel_ids"], serde_json::json!([stuck.parcel.id]));
}

#[tokio::test]
async fn out_of_service_locker_is_left_out_of_service() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;
    let grant = h.grant(Role::Maintenance, Permission::ManageLockers).await;
    h.engine
        .allocator
        .set_status(&grant, deposit.locker.id, LockerStatus::OutOfService)
        .await
        .unwrap();

    let now = deposit.parcel.deposited_at + Duration::days(8);
    let report = h
        .engine
        .lifecycle
        .process_overdue_at(7, now, &AuditContext::system())
        .await
        .unwrap();

    assert_eq!(report.processed.len(), 1);
    assert_eq!(h.locker(deposit.locker.id).await.status, LockerStatus::OutOfService);
    let returned = h.audit.last(actions::SYSTEM_OVERDUE_RETURN).unwrap();
    assert_eq!(returned.details["locker_blocked"], false);
}

#[tokio::test]
async fn emptied_locker_returns_to_service() {
    let h = harness(&[("Library East", LockerSize::Small)]).await;
    let (deposit, _) = h.deposit("student@campus.edu", LockerSize::Small).await;
    let now = deposit.parcel.deposited_at + Duration::days(8);
    h.engine
        .lifecycle
        .process_overdue_at(7, now, &AuditContext::system())
        .await
        .unwrap();

    // Blocked until someone empties it.
    assert_matches!(
        h.engine.lifecycle.deposit("next@campus.edu", LockerSize::Small, &ctx()).await,
        Err(lockerhub_core::error::CoreError::NoCapacity { .. })
    );

    let grant = h.grant(Role::Maintenance, Permission::ManageLockers).await;
    let outcome = h.engine.allocator.mark_emptied(&grant, deposit.locker.id).await.unwrap();
    assert_matches!(outcome, EmptyOutcome::Emptied(ref locker) if locker.status == LockerStatus::Free);
    assert_eq!(h.audit.count(actions::ADMIN_LOCKER_EMPTIED), 1);

    let (next, _) = h.deposit("next@campus.edu", LockerSize::Small).await;
    assert_eq!(next.locker.id, deposit.locker.id);
}

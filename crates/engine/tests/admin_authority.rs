mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{ctx, harness, STAFF_PASSWORD, SUPER_PASSWORD, SUPER_USERNAME};
use lockerhub_core::admin::{AdminSession, CreateAdminUser};
use lockerhub_core::audit::actions;
use lockerhub_core::error::CoreError;
use lockerhub_core::roles::{Permission, Role};
use lockerhub_core::store::AdminStore;
use lockerhub_engine::authority::{INVALID_CREDENTIALS, SESSION_EXPIRED};
use lockerhub_engine::password::dummy_verifications;
use lockerhub_engine::session_token;

#[tokio::test]
async fn maintenance_cannot_process_overdue() {
    let h = harness(&[]).await;
    let token = h.login(Role::Maintenance).await;

    let err = h
        .engine
        .authority
        .authorize(&token, Permission::ProcessOverdue, &ctx())
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::Forbidden(_));

    let denied = h.audit.last(actions::ADMIN_PERMISSION_DENIED).unwrap();
    assert_eq!(denied.details["role"], "maintenance");
    assert_eq!(denied.details["action"], "process_overdue");
    assert_eq!(denied.details["username"], "maintenance_staff");
    assert!(denied.admin_id.is_some());
    assert_eq!(denied.ip_address.as_deref(), Some("10.1.2.3"));
}

#[tokio::test]
async fn maintenance_may_manage_lockers() {
    let h = harness(&[]).await;
    let token = h.login(Role::Maintenance).await;
    let grant = h
        .engine
        .authority
        .authorize(&token, Permission::ManageLockers, &ctx())
        .await
        .unwrap();
    assert_eq!(grant.role(), Role::Maintenance);
    assert_ne!(grant.token(), token);
}

#[tokio::test]
async fn login_failures_share_one_message_but_audit_the_reason() {
    let h = harness(&[]).await;
    h.engine
        .authority
        .bootstrap_super_admin(SUPER_USERNAME, SUPER_PASSWORD)
        .await
        .unwrap();
    let authority = &h.engine.authority;

    let cases = [
        ("nobody_here", SUPER_PASSWORD, "not_found"),
        (SUPER_USERNAME, "definitely-wrong-pass", "wrong_password"),
        ("x", SUPER_PASSWORD, "format"),
    ];
    for (username, password, reason) in cases {
        let err = authority.authenticate(username, password, &ctx()).await.unwrap_err();
        assert_matches!(err, CoreError::Unauthorized(ref msg) if msg == INVALID_CREDENTIALS);
        assert_eq!(err.user_message(), INVALID_CREDENTIALS);

        let event = h.audit.last(actions::ADMIN_LOGIN_FAIL).unwrap();
        assert_eq!(event.details["reason"], reason);
        assert!(!event.details.to_string().contains(password));
    }
    assert_eq!(h.audit.count(actions::ADMIN_LOGIN_FAIL), 3);
    assert_eq!(h.audit.count(actions::ADMIN_LOGIN_SUCCESS), 0);
}

#[tokio::test]
async fn every_failed_login_runs_one_password_verification() {
    let h = harness(&[]).await;
    h.engine
        .authority
        .bootstrap_super_admin(SUPER_USERNAME, SUPER_PASSWORD)
        .await
        .unwrap();
    let authority = &h.engine.authority;

    // Unknown and malformed usernames have no stored hash to check.
    for username in ["nobody_here", "x", "bad name;--"] {
        let before = dummy_verifications();
        authority.authenticate(username, SUPER_PASSWORD, &ctx()).await.unwrap_err();
        assert_eq!(dummy_verifications(), before + 1, "{username}");
    }

    // A known account is checked against its own hash instead.
    let before = dummy_verifications();
    authority
        .authenticate(SUPER_USERNAME, "definitely-wrong-pass", &ctx())
        .await
        .unwrap_err();
    authority.authenticate(SUPER_USERNAME, SUPER_PASSWORD, &ctx()).await.unwrap();
    assert_eq!(dummy_verifications(), before);
}

#[tokio::test]
async fn successful_login_stamps_last_login() {
    let h = harness(&[]).await;
    let user = h
        .engine
        .authority
        .bootstrap_super_admin(SUPER_USERNAME, SUPER_PASSWORD)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.last_login, None);

    let login = h
        .engine
        .authority
        .authenticate(SUPER_USERNAME, SUPER_PASSWORD, &ctx())
        .await
        .unwrap();
    assert_eq!(login.session.admin_id, user.id);
    assert_eq!(login.session.role, Role::SuperAdmin);

    let stored = h.store.get_by_username(SUPER_USERNAME).await.unwrap().unwrap();
    assert!(stored.last_login.is_some());
    let success = h.audit.last(actions::ADMIN_LOGIN_SUCCESS).unwrap();
    assert_eq!(success.admin_id, Some(user.id));
}

#[tokio::test]
async fn resume_rolls_the_token() {
    let h = harness(&[]).await;
    let token = h.login(Role::Admin).await;

    let resumed = h.engine.authority.resume(&token, &ctx()).await.unwrap();
    assert_ne!(resumed.token, token);
    assert_eq!(resumed.session.username, "admin_staff");

    let again = h.engine.authority.resume(&resumed.token, &ctx()).await.unwrap();
    assert!(again.session.last_activity >= resumed.session.last_activity);
}

#[tokio::test]
async fn session_past_its_absolute_limit_is_expired() {
    let h = harness(&[]).await;
    let user = h
        .engine
        .authority
        .bootstrap_super_admin(SUPER_USERNAME, SUPER_PASSWORD)
        .await
        .unwrap()
        .unwrap();
    let now = Utc::now();
    let mut session = AdminSession::start(&user, now - Duration::hours(9));
    session.touch(now - Duration::minutes(1));
    let token = session_token::issue(&session, &h.engine.config.session).unwrap();

    let err = h.engine.authority.resume(&token, &ctx()).await.unwrap_err();
    assert_matches!(err, CoreError::Unauthorized(ref msg) if msg == SESSION_EXPIRED);
    let event = h.audit.last(actions::ADMIN_SESSION_EXPIRED).unwrap();
    assert_eq!(event.details["reason"], "absolute_timeout");
}

#[tokio::test]
async fn idle_session_is_expired() {
    let h = harness(&[]).await;
    let user = h
        .engine
        .authority
        .bootstrap_super_admin(SUPER_USERNAME, SUPER_PASSWORD)
        .await
        .unwrap()
        .unwrap();
    let now = Utc::now();
    let mut session = AdminSession::start(&user, now - Duration::hours(1));
    session.touch(now - Duration::minutes(31));
    let token = session_token::issue(&session, &h.engine.config.session).unwrap();

    assert_matches!(
        h.engine
            .authority
            .authorize(&token, Permission::ViewParcels, &ctx())
            .await,
        Err(CoreError::Unauthorized(_))
    );
    let event = h.audit.last(actions::ADMIN_SESSION_EXPIRED).unwrap();
    assert_eq!(event.details["reason"], "inactivity_timeout");
}

#[tokio::test]
async fn tampered_token_is_rejected_and_audited() {
    let h = harness(&[]).await;
    let mut token = h.login(Role::Admin).await;
    token.push('x');

    assert_matches!(
        h.engine.authority.resume(&token, &ctx()).await,
        Err(CoreError::Unauthorized(_))
    );
    assert_eq!(h.audit.count(actions::ADMIN_SESSION_INVALID), 1);
}

#[tokio::test]
async fn role_changes_apply_to_live_sessions() {
    let h = harness(&[]).await;
    let token = h.login(Role::Admin).await;

    let mut user = h.store.get_by_username("admin_staff").await.unwrap().unwrap();
    user.role = Role::Maintenance;
    h.store.save(&user).await.unwrap();

    assert_matches!(
        h.engine
            .authority
            .authorize(&token, Permission::MarkMissing, &ctx())
            .await,
        Err(CoreError::Forbidden(_))
    );
}

#[tokio::test]
async fn check_permission_follows_the_role_table() {
    let h = harness(&[]).await;
    let token = h.login(Role::Admin).await;
    let login = h.engine.authority.resume(&token, &ctx()).await.unwrap();
    let authority = &h.engine.authority;

    assert!(authority
        .check_permission(&login.session, Permission::ReissuePin, &ctx())
        .is_ok());
    assert_matches!(
        authority.check_permission(&login.session, Permission::ManageAdmins, &ctx()),
        Err(CoreError::Forbidden(_))
    );
    assert_eq!(h.audit.count(actions::ADMIN_PERMISSION_DENIED), 1);
}

#[tokio::test]
async fn only_super_admins_create_accounts() {
    let h = harness(&[]).await;
    let root = h.grant(Role::SuperAdmin, Permission::ManageAdmins).await;
    let authority = &h.engine.authority;

    let request = CreateAdminUser {
        username: "night_desk".into(),
        password: STAFF_PASSWORD.into(),
        role: Role::Admin,
    };
    let created = authority.create_admin(&root, &request).await.unwrap();
    assert_eq!(created.role, Role::Admin);
    assert_ne!(created.password_hash, STAFF_PASSWORD);
    assert_eq!(h.audit.count(actions::ADMIN_CREATE_USER), 1);

    assert_matches!(
        authority.create_admin(&root, &request).await,
        Err(CoreError::Conflict(_))
    );

    let weak = CreateAdminUser {
        username: "weak_pass".into(),
        password: "short".into(),
        role: Role::Admin,
    };
    assert_matches!(
        authority.create_admin(&root, &weak).await,
        Err(CoreError::Validation(_))
    );

    let admin = h.grant(Role::Admin, Permission::ViewParcels).await;
    let other = CreateAdminUser { username: "another_one".into(), ..request };
    assert_matches!(
        authority.create_admin(&admin, &other).await,
        Err(CoreError::Forbidden(_))
    );
    assert!(h.store.get_by_username("another_one").await.unwrap().is_none());
}

#[tokio::test]
async fn bootstrap_runs_once() {
    let h = harness(&[]).await;
    let authority = &h.engine.authority;

    let first = authority
        .bootstrap_super_admin(SUPER_USERNAME, SUPER_PASSWORD)
        .await
        .unwrap();
    assert_eq!(first.map(|u| u.role), Some(Role::SuperAdmin));

    let second = authority
        .bootstrap_super_admin("second_root", SUPER_PASSWORD)
        .await
        .unwrap();
    assert!(second.is_none());
    assert_eq!(h.store.count().await.unwrap(), 1);
    assert_eq!(h.audit.count(actions::ADMIN_BOOTSTRAP), 1);
}

#[tokio::test]
async fn logout_is_audited() {
    let h = harness(&[]).await;
    let token = h.login(Role::Admin).await;
    let login = h.engine.authority.resume(&token, &ctx()).await.unwrap();

    h.engine.authority.logout(&login.session, &ctx());
    let event = h.audit.last(actions::ADMIN_LOGOUT).unwrap();
    assert_eq!(event.admin_id, Some(login.session.admin_id));
    assert_eq!(event.details["username"], "admin_staff");
}

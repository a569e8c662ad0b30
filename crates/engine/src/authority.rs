//! Admin identity, session validity and role-based permission checks.

use std::sync::Arc;

use chrono::Utc;
use lockerhub_core::admin::{AdminSession, AdminUser, CreateAdminUser, NewAdminUser, SessionValidity};
use lockerhub_core::audit::{actions, AuditContext};
use lockerhub_core::config::SessionConfig;
use lockerhub_core::error::{CoreError, CoreResult};
use lockerhub_core::roles::{Permission, Role};
use lockerhub_core::store::AdminStore;
use lockerhub_core::types::DbId;
use lockerhub_core::validation::validate_username;
use serde_json::json;

use crate::audit_trail::AuditTrail;
use crate::password::{hash_password, verify_against_dummy, verify_password};
use crate::session_token;

/// The only message a failed login ever shows.
pub const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Shown when a session is past either of its limits.
pub const SESSION_EXPIRED: &str = "Session expired, please log in again";

/// A successful login: the session and its signed token.
#[derive(Debug, Clone)]
pub struct Login {
    pub session: AdminSession,
    pub token: String,
}

/// A validated session that passed a permission check.
///
/// Only [`AdminAuthority::authorize`] hands these out. Admin operations take
/// a grant and re-check the permission they need against its role.
#[derive(Debug, Clone)]
pub struct Grant {
    session: AdminSession,
    token: String,
    context: AuditContext,
}

impl Grant {
    pub fn session(&self) -> &AdminSession {
        &self.session
    }

    pub fn admin_id(&self) -> DbId {
        self.session.admin_id
    }

    pub fn role(&self) -> Role {
        self.session.role
    }

    /// The rolled session token to hand back to the caller.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn context(&self) -> &AuditContext {
        &self.context
    }
}

/// Check `permission` against the grant's role, auditing a refusal.
pub(crate) fn require(audit: &AuditTrail, grant: &Grant, permission: Permission) -> CoreResult<()> {
    check(audit, &grant.session, permission, &grant.context)
}

fn check(
    audit: &AuditTrail,
    session: &AdminSession,
    permission: Permission,
    context: &AuditContext,
) -> CoreResult<()> {
    if session.role.allows(permission) {
        return Ok(());
    }
    tracing::warn!(admin_id = session.admin_id, role = %session.role, %permission, "Permission denied");
    audit.record(
        actions::ADMIN_PERMISSION_DENIED,
        json!({
            "admin_id": session.admin_id,
            "username": session.username,
            "role": session.role,
            "action": permission,
        }),
        context,
    );
    Err(CoreError::Forbidden(format!(
        "Role '{}' is not permitted to {}",
        session.role, permission
    )))
}

#[derive(Clone)]
pub struct AdminAuthority {
    admins: Arc<dyn AdminStore>,
    audit: AuditTrail,
    config: SessionConfig,
}

impl AdminAuthority {
    pub fn new(admins: Arc<dyn AdminStore>, audit: AuditTrail, config: SessionConfig) -> Self {
        Self { admins, audit, config }
    }

    /// Verify credentials and start a session.
    ///
    /// Every failure is audited with its specific reason but reported to the
    /// caller only as [`INVALID_CREDENTIALS`]. Unknown and malformed
    /// usernames still pay for one Argon2 verification.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        context: &AuditContext,
    ) -> CoreResult<Login> {
        let escalate = |e: CoreError| self.audit.escalate("authenticate", e, context);
        if validate_username(username).is_err() {
            verify_against_dummy(password);
            return Err(self.login_failed(username, "format", context));
        }
        let Some(mut user) = self.admins.get_by_username(username).await.map_err(escalate)? else {
            verify_against_dummy(password);
            return Err(self.login_failed(username, "not_found", context));
        };
        match verify_password(password, &user.password_hash) {
            Ok(true) => {}
            Ok(false) => return Err(self.login_failed(username, "wrong_password", context)),
            Err(e) => {
                tracing::error!(admin_id = user.id, error = %e, "Stored password hash unreadable");
                return Err(self.login_failed(username, "hash_unreadable", context));
            }
        }

        let now = Utc::now();
        user.last_login = Some(now);
        self.admins.save(&user).await.map_err(escalate)?;

        let session = AdminSession::start(&user, now);
        let token = session_token::issue(&session, &self.config).map_err(escalate)?;

        tracing::info!(admin_id = user.id, username = %user.username, "Admin logged in");
        self.audit.record(
            actions::ADMIN_LOGIN_SUCCESS,
            json!({ "admin_id": user.id, "username": user.username, "role": user.role }),
            &session_context(context, &session),
        );
        Ok(Login { session, token })
    }

    fn login_failed(&self, username: &str, reason: &str, context: &AuditContext) -> CoreError {
        let shown: String = username.chars().take(50).collect();
        tracing::warn!(username = %shown, reason, "Admin login failed");
        self.audit.record(
            actions::ADMIN_LOGIN_FAIL,
            json!({ "username": shown, "reason": reason }),
            context,
        );
        CoreError::Unauthorized(INVALID_CREDENTIALS.into())
    }

    /// Rebuild a session from its token, enforce both time limits, and roll
    /// the activity timestamp.
    pub async fn resume(&self, token: &str, context: &AuditContext) -> CoreResult<Login> {
        let (mut session, claims) = match session_token::read(token, &self.config) {
            Ok(read) => read,
            Err(e) => {
                self.audit.record(
                    actions::ADMIN_SESSION_INVALID,
                    json!({ "error": e.to_string() }),
                    context,
                );
                return Err(e);
            }
        };

        let now = Utc::now();
        let validity = session.validity_at(&self.config, now);
        if validity != SessionValidity::Active {
            let reason = match validity {
                SessionValidity::Expired => "absolute_timeout",
                _ => "inactivity_timeout",
            };
            tracing::info!(admin_id = session.admin_id, reason, "Admin session expired");
            self.audit.record(
                actions::ADMIN_SESSION_EXPIRED,
                json!({ "admin_id": session.admin_id, "reason": reason, "jti": claims.jti }),
                &session_context(context, &session),
            );
            return Err(CoreError::Unauthorized(SESSION_EXPIRED.into()));
        }

        // The account may have been removed or re-roled since login.
        let user = self
            .admins
            .get_by_id(session.admin_id)
            .await
            .map_err(|e| self.audit.escalate("resume", e, context))?
            .ok_or_else(|| CoreError::Unauthorized(SESSION_EXPIRED.into()))?;
        session.role = user.role;
        session.touch(now);

        let token = session_token::issue(&session, &self.config)
            .map_err(|e| self.audit.escalate("resume", e, context))?;
        Ok(Login { session, token })
    }

    /// Check a permission for `session`, auditing a refusal.
    pub fn check_permission(
        &self,
        session: &AdminSession,
        permission: Permission,
        context: &AuditContext,
    ) -> CoreResult<()> {
        check(&self.audit, session, permission, &session_context(context, session))
    }

    /// Resume the session behind `token` and check `permission` in one step.
    pub async fn authorize(
        &self,
        token: &str,
        permission: Permission,
        context: &AuditContext,
    ) -> CoreResult<Grant> {
        let login = self.resume(token, context).await?;
        let context = session_context(context, &login.session);
        check(&self.audit, &login.session, permission, &context)?;
        Ok(Grant {
            session: login.session,
            token: login.token,
            context,
        })
    }

    /// Record a logout. Tokens are stateless; the caller drops its copy.
    pub fn logout(&self, session: &AdminSession, context: &AuditContext) {
        tracing::info!(admin_id = session.admin_id, "Admin logged out");
        self.audit.record(
            actions::ADMIN_LOGOUT,
            json!({ "admin_id": session.admin_id, "username": session.username }),
            &session_context(context, session),
        );
    }

    /// Create another admin account. Requires `manage_admins`.
    pub async fn create_admin(&self, grant: &Grant, request: &CreateAdminUser) -> CoreResult<AdminUser> {
        require(&self.audit, grant, Permission::ManageAdmins)?;
        let user = self
            .insert_admin(request)
            .await
            .map_err(|e| self.audit.escalate("create_admin", e, grant.context()))?;
        self.audit.record(
            actions::ADMIN_CREATE_USER,
            json!({ "new_admin_id": user.id, "username": user.username, "role": user.role }),
            grant.context(),
        );
        Ok(user)
    }

    /// Create the first super admin, only while no admin exists.
    ///
    /// Returns `None` when admins already exist.
    pub async fn bootstrap_super_admin(
        &self,
        username: &str,
        password: &str,
    ) -> CoreResult<Option<AdminUser>> {
        let ctx = AuditContext::system();
        let escalate = |e: CoreError| self.audit.escalate("bootstrap_super_admin", e, &ctx);
        if self.admins.count().await.map_err(escalate)? > 0 {
            return Ok(None);
        }
        let request = CreateAdminUser {
            username: username.to_string(),
            password: password.to_string(),
            role: Role::SuperAdmin,
        };
        let user = self.insert_admin(&request).await.map_err(escalate)?;
        tracing::warn!(admin_id = user.id, username = %user.username, "Bootstrapped first super admin");
        self.audit.record(
            actions::ADMIN_BOOTSTRAP,
            json!({ "admin_id": user.id, "username": user.username }),
            &ctx,
        );
        Ok(Some(user))
    }

    async fn insert_admin(&self, request: &CreateAdminUser) -> CoreResult<AdminUser> {
        request.check()?;
        if self.admins.get_by_username(&request.username).await?.is_some() {
            return Err(CoreError::Conflict(format!(
                "Username '{}' is already taken",
                request.username
            )));
        }
        let input = NewAdminUser {
            username: request.username.clone(),
            password_hash: hash_password(&request.password)?,
            role: request.role,
        };
        self.admins.create(&input).await
    }
}

/// Caller context enriched with the session's identity.
fn session_context(context: &AuditContext, session: &AdminSession) -> AuditContext {
    AuditContext {
        admin_id: Some(session.admin_id),
        user_id: context.user_id.clone().or_else(|| Some(session.username.clone())),
        ..context.clone()
    }
}

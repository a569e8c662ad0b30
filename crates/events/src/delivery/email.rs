//! Recipient notifications via SMTP.
//!
//! [`EmailDelivery`] wraps the `lettre` async SMTP transport and renders
//! each notification with [`template::render`]. Configuration is loaded from
//! environment variables; if `SMTP_HOST` is not set, [`EmailConfig::from_env`]
//! returns `None` and the caller should fall back to
//! [`LogOnlySender`](super::log_only::LogOnlySender).

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use lockerhub_core::error::{CoreError, CoreResult};
use lockerhub_core::notification::{NotificationData, NotificationKind};
use lockerhub_core::store::NotificationSender;

use super::template;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for email delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),
}

impl From<EmailError> for CoreError {
    fn from(err: EmailError) -> Self {
        CoreError::Delivery(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "noreply@lockerhub.local";

/// Default self-service page when `PIN_REGENERATION_URL` is not set.
const DEFAULT_REGENERATION_URL: &str = "http://localhost:3000/regenerate-pin";

#[derive(Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    /// Page that generation-token links point at.
    pub regeneration_url: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("from_address", &self.from_address)
            .field("smtp_user", &self.smtp_user)
            .field("smtp_password", &self.smtp_password.as_ref().map(|_| "[REDACTED]"))
            .field("regeneration_url", &self.regeneration_url)
            .finish()
    }
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` is not set.
    ///
    /// | Variable               | Required | Default                                |
    /// |------------------------|----------|----------------------------------------|
    /// | `SMTP_HOST`            | yes      | --                                     |
    /// | `SMTP_PORT`            | no       | `587`                                  |
    /// | `SMTP_FROM`            | no       | `noreply@lockerhub.local`              |
    /// | `SMTP_USER`            | no       | --                                     |
    /// | `SMTP_PASSWORD`        | no       | --                                     |
    /// | `PIN_REGENERATION_URL` | no       | `http://localhost:3000/regenerate-pin` |
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok().filter(|h| !h.is_empty())?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
            regeneration_url: std::env::var("PIN_REGENERATION_URL")
                .unwrap_or_else(|_| DEFAULT_REGENERATION_URL.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// EmailDelivery
// ---------------------------------------------------------------------------

/// Sends recipient notifications via SMTP.
pub struct EmailDelivery {
    config: EmailConfig,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailDelivery {
    /// Build the SMTP transport. No connection is made until the first send.
    pub fn new(config: EmailConfig) -> Result<Self, EmailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            config,
        })
    }

    fn build_message(
        &self,
        to_email: &str,
        kind: NotificationKind,
        data: &NotificationData,
    ) -> Result<Message, EmailError> {
        let rendered = template::render(kind, data, &self.config.regeneration_url);
        Message::builder()
            .from(self.config.from_address.parse()?)
            .to(to_email.parse()?)
            .subject(rendered.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body)
            .map_err(|e| EmailError::Build(e.to_string()))
    }

    /// Send one notification email.
    pub async fn deliver(
        &self,
        to_email: &str,
        kind: NotificationKind,
        data: &NotificationData,
    ) -> Result<(), EmailError> {
        let email = self.build_message(to_email, kind, data)?;
        self.mailer.send(email).await?;

        tracing::info!(parcel_id = data.parcel_id, kind = %kind, "Notification email sent");
        Ok(())
    }
}

#[async_trait]
impl NotificationSender for EmailDelivery {
    async fn send(
        &self,
        recipient: &str,
        kind: NotificationKind,
        data: &NotificationData,
    ) -> CoreResult<()> {
        self.deliver(recipient, kind, data).await.map_err(CoreError::from)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

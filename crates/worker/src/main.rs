use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lockerhub_core::config::EngineConfig;
use lockerhub_core::store::NotificationSender;
use lockerhub_db::PgStore;
use lockerhub_engine::{Collaborators, Engine};
use lockerhub_events::{AuditPersistence, ChannelAuditSink, EmailConfig, EmailDelivery, LogOnlySender};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod scheduler;

use scheduler::OverdueScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lockerhub_worker=debug,lockerhub_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = lockerhub_db::create_pool(&database_url)
        .await
        .context("failed to connect to database")?;
    lockerhub_db::health_check(&pool)
        .await
        .context("database health check failed")?;
    tracing::info!("Database connection established");

    lockerhub_db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!("Database migrations applied");

    let (audit_sink, audit_rx) = ChannelAuditSink::channel();
    let persistence = tokio::spawn(AuditPersistence::run(pool.clone(), audit_rx));

    let notifier: Arc<dyn NotificationSender> = match EmailConfig::from_env() {
        Some(email) => {
            tracing::info!(smtp_host = %email.smtp_host, "SMTP delivery enabled");
            Arc::new(EmailDelivery::new(email).context("invalid SMTP configuration")?)
        }
        None => {
            tracing::warn!("SMTP_HOST not set, notifications will only be logged");
            Arc::new(LogOnlySender)
        }
    };

    let store = Arc::new(PgStore::new(pool.clone()));
    let engine = Engine::new(
        config,
        Collaborators {
            lockers: store.clone(),
            parcels: store.clone(),
            admins: store,
            audit: Arc::new(audit_sink),
            notifier,
        },
    )
    .context("failed to build engine")?;

    let provisioned = engine
        .allocator
        .provision(&engine.config.lockers.provision)
        .await
        .context("locker provisioning failed")?;
    if !provisioned.is_empty() {
        tracing::info!(count = provisioned.len(), "Lockers provisioned");
    }

    bootstrap_admin(&engine).await?;

    let cancel = CancellationToken::new();
    let interval = Duration::from_secs(engine.config.overdue_interval_secs.max(1));
    let scheduler = tokio::spawn(
        OverdueScheduler::new(engine.lifecycle.clone(), interval).run(cancel.clone()),
    );
    tracing::info!(interval_secs = interval.as_secs(), "Worker started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    cancel.cancel();
    scheduler.await.context("overdue scheduler panicked")?;

    // Last audit sender goes away here; persistence drains and exits.
    drop(engine);
    persistence.await.context("audit persistence panicked")?;

    pool.close().await;
    tracing::info!("Worker stopped");
    Ok(())
}

/// Create the first super admin from `BOOTSTRAP_ADMIN_USERNAME` and
/// `BOOTSTRAP_ADMIN_PASSWORD` when no admin account exists yet.
async fn bootstrap_admin(engine: &Engine) -> anyhow::Result<()> {
    let (Ok(username), Ok(password)) = (
        std::env::var("BOOTSTRAP_ADMIN_USERNAME"),
        std::env::var("BOOTSTRAP_ADMIN_PASSWORD"),
    ) else {
        return Ok(());
    };

    match engine
        .authority
        .bootstrap_super_admin(&username, &password)
        .await
        .context("super admin bootstrap failed")?
    {
        Some(user) => tracing::info!(admin_id = user.id, username = %user.username, "Super admin created"),
        None => tracing::debug!("Admin accounts exist, bootstrap skipped"),
    }
    Ok(())
}

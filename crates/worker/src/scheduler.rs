//! Periodic overdue batch.
//!
//! [`OverdueScheduler`] runs [`ParcelLifecycle::process_overdue`] on a fixed
//! interval until its [`CancellationToken`] is cancelled. The first batch
//! runs immediately on start.

use std::time::Duration;

use lockerhub_core::audit::AuditContext;
use lockerhub_engine::lifecycle::ParcelLifecycle;
use tokio_util::sync::CancellationToken;

pub struct OverdueScheduler {
    lifecycle: ParcelLifecycle,
    interval: Duration,
}

impl OverdueScheduler {
    pub fn new(lifecycle: ParcelLifecycle, interval: Duration) -> Self {
        Self { lifecycle, interval }
    }

    /// Run the scheduler loop. Consumes the scheduler so its handles are
    /// released on exit.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Overdue scheduler cancelled");
                    break;
                }
                _ = interval.tick() => self.run_batch().await,
            }
        }
    }

    async fn run_batch(&self) {
        match self.lifecycle.process_overdue(&AuditContext::system()).await {
            Ok(report) if report.is_empty() => {
                tracing::debug!("No overdue parcels");
            }
            Ok(report) => {
                tracing::info!(
                    processed = report.processed.len(),
                    failed = report.failed.len(),
                    "Overdue batch complete"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Overdue batch failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lockerhub_core::config::{EngineConfig, KdfParams};
    use lockerhub_engine::memory::{MemoryAuditSink, MemoryStore, RecordingNotifier};
    use lockerhub_engine::{Collaborators, Engine};

    use super::*;

    fn engine() -> Engine {
        let mut config = EngineConfig::new("scheduler-test-secret");
        config.pin.kdf = KdfParams::minimal();
        let store = Arc::new(MemoryStore::new());
        Engine::new(
            config,
            Collaborators {
                lockers: store.clone(),
                parcels: store.clone(),
                admins: store,
                audit: Arc::new(MemoryAuditSink::new()),
                notifier: Arc::new(RecordingNotifier::new()),
            },
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_cancelled() {
        let scheduler = OverdueScheduler::new(engine().lifecycle, Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(7200)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}

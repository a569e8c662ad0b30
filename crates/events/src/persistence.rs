//! Durable audit persistence.
//!
//! [`AuditPersistence::run`] drains the [`ChannelAuditSink`](crate::ChannelAuditSink)
//! receiver and appends every event to the `audit_logs` hash chain. It runs
//! as a long-lived background task and exits once every sender is dropped,
//! after the queue is empty.

use lockerhub_core::audit::{verify_chain, AuditEvent, IntegrityCheckResult, StoredAuditEvent};
use lockerhub_core::error::CoreResult;
use lockerhub_core::types::DbId;
use lockerhub_db::error::into_core;
use lockerhub_db::repositories::AuditLogRepo;
use lockerhub_db::DbPool;
use tokio::sync::mpsc;

/// Background service that persists audit events to the database.
pub struct AuditPersistence;

impl AuditPersistence {
    /// Run the persistence loop until the channel closes.
    pub async fn run(pool: DbPool, mut receiver: mpsc::UnboundedReceiver<AuditEvent>) {
        let mut persisted: u64 = 0;
        while let Some(event) = receiver.recv().await {
            match AuditLogRepo::append_chained(&pool, &event).await {
                Ok(row) => {
                    persisted += 1;
                    tracing::debug!(audit_id = row.id, action = %event.action, "Audit event persisted");
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        action = %event.action,
                        severity = %event.severity,
                        "Failed to persist audit event"
                    );
                }
            }
        }
        tracing::info!(persisted, "Audit channel closed, persistence shutting down");
    }

    /// Re-walk the stored chain from `from_id` (or the beginning).
    ///
    /// When starting mid-chain, the hash of the preceding row is the link
    /// the first checked entry must chain from.
    pub async fn verify(pool: &DbPool, from_id: Option<DbId>) -> CoreResult<IntegrityCheckResult> {
        let prev = match from_id {
            Some(id) => AuditLogRepo::find_hash_before(pool, id).await.map_err(into_core)?,
            None => None,
        };
        let entries = AuditLogRepo::fetch_for_integrity_check(pool, from_id)
            .await
            .map_err(into_core)?
            .into_iter()
            .map(StoredAuditEvent::try_from)
            .collect::<CoreResult<Vec<_>>>()?;

        let result = verify_chain(prev.as_deref(), &entries);
        if result.chain_valid {
            tracing::info!(verified = result.verified_entries, "Audit chain verified");
        } else {
            tracing::error!(
                verified = result.verified_entries,
                first_break = ?result.first_break,
                "Audit chain broken"
            );
        }
        Ok(result)
    }
}

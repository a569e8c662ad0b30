//! Front-end to the audit sink used by every service.
//!
//! Recording never fails the calling operation. An event that does not pass
//! validation is replaced by an `AUDIT_VALIDATION_ERROR` record describing
//! it, and a sink that refuses the hand-off is reported through `tracing`.

use std::sync::Arc;

use lockerhub_core::audit::{actions, AuditContext, AuditEvent, MAX_ACTION_LENGTH};
use lockerhub_core::error::CoreError;
use lockerhub_core::store::AuditSink;
use serde_json::json;

#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Classify, validate and hand off one event.
    pub fn record(&self, action: &str, details: serde_json::Value, context: &AuditContext) {
        let event = match AuditEvent::new(action, details, context) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(action = %truncated(action), error = %e, "Audit event rejected");
                match fallback_event(action, &e, context) {
                    Some(event) => event,
                    None => return,
                }
            }
        };
        self.hand_off(event);
    }

    /// Record an `ERROR_EVENT` carrying the underlying failure detail.
    pub fn record_error(&self, operation: &str, err: &CoreError, context: &AuditContext) {
        self.record(
            actions::ERROR_EVENT,
            json!({ "operation": operation, "error": err.to_string() }),
            context,
        );
    }

    /// Record storage and internal failures as `ERROR_EVENT`, then hand the
    /// error back for the caller to return. Other errors pass through
    /// unrecorded.
    pub fn escalate(&self, operation: &str, err: CoreError, context: &AuditContext) -> CoreError {
        if matches!(err, CoreError::Persistence(_) | CoreError::Internal(_)) {
            tracing::error!(operation, error = %err, "Operation failed");
            self.record_error(operation, &err, context);
        }
        err
    }

    fn hand_off(&self, event: AuditEvent) {
        let action = event.action.clone();
        if let Err(e) = self.sink.append(event) {
            tracing::error!(action = %action, error = %e, "Failed to hand off audit event");
        }
    }
}

/// Build the `AUDIT_VALIDATION_ERROR` record that stands in for a rejected event.
fn fallback_event(action: &str, err: &CoreError, context: &AuditContext) -> Option<AuditEvent> {
    let details = json!({
        "rejected_action": truncated(action),
        "error": err.to_string(),
    });
    match AuditEvent::new(actions::AUDIT_VALIDATION_ERROR, details, context) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::error!(error = %e, "Audit fallback event rejected");
            None
        }
    }
}

fn truncated(action: &str) -> String {
    action.chars().take(MAX_ACTION_LENGTH).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAuditSink;
    use lockerhub_core::audit::AuditCategory;

    fn trail() -> (AuditTrail, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        (AuditTrail::new(sink.clone()), sink)
    }

    #[test]
    fn records_classified_event() {
        let (trail, sink) = trail();
        trail.record(actions::USER_DEPOSIT, json!({ "parcel_id": 1 }), &AuditContext::system());

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.action, actions::USER_DEPOSIT);
        assert_eq!(events[0].event.category, AuditCategory::UserAction);
    }

    #[test]
    fn invalid_action_becomes_validation_error_record() {
        let (trail, sink) = trail();
        trail.record("DROP;TABLE", json!({}), &AuditContext::system());

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.action, actions::AUDIT_VALIDATION_ERROR);
        assert_eq!(events[0].event.details["rejected_action"], "DROP;TABLE");
    }

    #[test]
    fn oversized_details_become_validation_error_record() {
        let (trail, sink) = trail();
        let blob = "x".repeat(20_000);
        trail.record(actions::USER_DEPOSIT, json!({ "blob": blob }), &AuditContext::system());
        assert_eq!(sink.actions(), vec![actions::AUDIT_VALIDATION_ERROR.to_string()]);
    }

    #[test]
    fn error_event_carries_error_field() {
        let (trail, sink) = trail();
        let err = CoreError::Persistence("disk full".into());
        trail.record_error("deposit", &err, &AuditContext::system());

        let events = sink.events();
        assert_eq!(events[0].event.category, AuditCategory::ErrorEvent);
        assert!(events[0].event.details["error"].as_str().unwrap().contains("disk full"));
    }

    #[test]
    fn escalate_records_only_system_failures() {
        let (trail, sink) = trail();
        let ctx = AuditContext::system();

        let err = trail.escalate("set_status", CoreError::Persistence("timeout".into()), &ctx);
        assert!(matches!(err, CoreError::Persistence(_)));
        let err = trail.escalate("set_status", CoreError::Conflict("busy".into()), &ctx);
        assert!(matches!(err, CoreError::Conflict(_)));

        assert_eq!(sink.actions(), vec![actions::ERROR_EVENT.to_string()]);
        assert_eq!(sink.events()[0].event.details["operation"], "set_status");
    }

    #[test]
    fn refused_hand_off_does_not_panic() {
        let (trail, sink) = trail();
        sink.set_refusing(true);
        trail.record(actions::USER_PICKUP, json!({}), &AuditContext::system());
        assert!(sink.events().is_empty());
    }
}

//! Authorization audit channel
//!
//! Audit records are separate from operational logging: every authorization
//! outcome is emitted as a structured event under `target = "audit"` carrying
//! the identity, resource, action, correlation id, and outcome. Emission is
//! fire-and-forget and never blocks a pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome of an authorization decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Forwarded,
    Rejected,
    TimedOut,
    Error,
}

impl std::fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Forwarded => "forwarded",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// One authorization audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub topic: String,
    pub resource: String,
    pub action: String,
    pub correlation_id: String,
    pub outcome: AuditOutcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditRecord {
    pub fn new(
        user_id: impl Into<String>,
        topic: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
        correlation_id: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id: user_id.into(),
            topic: topic.into(),
            resource: resource.into(),
            action: action.into(),
            correlation_id: correlation_id.into(),
            outcome,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Audit sink for a coordinator
#[derive(Debug, Clone)]
pub struct AuditLog {
    service_name: String,
}

impl AuditLog {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Emit one authorization record
    pub fn record(&self, record: &AuditRecord) {
        tracing::info!(
            target: "audit",
            service = %self.service_name,
            user_id = %record.user_id,
            topic = %record.topic,
            resource = %record.resource,
            action = %record.action,
            correlation_id = %record.correlation_id,
            outcome = %record.outcome,
            reason = record.reason.as_deref().unwrap_or(""),
            "authorization outcome"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = AuditRecord::new(
            "u1",
            "bigskies/coordinator/telescope/control/slew",
            "telescope",
            "control",
            "c-123",
            AuditOutcome::Rejected,
        )
        .with_reason("no-grant");

        assert_eq!(record.outcome, AuditOutcome::Rejected);
        assert_eq!(record.reason.as_deref(), Some("no-grant"));
        assert_eq!(record.user_id, "u1");
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(AuditOutcome::Forwarded.to_string(), "forwarded");
        assert_eq!(AuditOutcome::TimedOut.to_string(), "timed_out");
    }

    #[test]
    fn test_record_emission_does_not_panic() {
        let log = AuditLog::new("message");
        let record = AuditRecord::new("u1", "t", "r", "a", "c", AuditOutcome::Forwarded);
        log.record(&record);
    }
}

//! Transparent RBAC interception for protected topics
//!
//! The interceptor owns two subscriptions: the coordinator-wide wildcard and
//! the security coordinator's verdict topic. A message matching a protection
//! rule is parked in the bounded pending queue while a validation request
//! round-trips the security coordinator; the verdict either republishes the
//! original payload (stamped with the post-authorization marker) or drops it.
//! Producers and consumers never participate.
//!
//! The policy is fail-closed: malformed envelopes, queue overflow, and an
//! unreachable security coordinator all reject rather than forward.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditLog, AuditOutcome, AuditRecord};
use crate::bus::{topic, BusClient, Envelope, MessageType};
use crate::config::{ProtectionRuleConfig, RbacConfig};
use crate::coordinator::ResponseCorrelator;
use crate::error::{Error, Result};
use crate::messages::{RbacValidateRequest, RbacValidateResponse, UserContext};
use crate::rbac::metrics::RbacMetrics;
use crate::rbac::pending::{PendingQueue, PendingValidation};
use crate::rbac::rules::{RuleMatch, RuleSet};

/// Rule list replacement delivered on the config update topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesUpdate {
    pub rules: Vec<ProtectionRuleConfig>,
}

/// What the intercept path decided for one delivered message
#[derive(Debug)]
pub(crate) enum Decision {
    /// The interceptor's own plumbing traffic; never gated, never forwarded
    Plumbing,
    /// A republish we already cleared; ignoring it breaks the loop
    AlreadyAuthorized,
    /// Health and status traffic is never gated
    HealthBypass,
    /// Interception is switched off
    Disabled,
    /// No protection rule matched
    Unmatched,
    /// Envelope or payload failed to parse
    Malformed(String),
    /// Matched a rule; validate with the security coordinator
    Validate {
        rule: RuleMatch,
        context: UserContext,
    },
}

/// The message coordinator's interception pipeline
pub struct RbacInterceptor {
    config: RbacConfig,
    coordinator_name: String,
    source: String,
    bus: Arc<BusClient>,
    rules: RuleSet,
    pending: PendingQueue,
    metrics: Arc<RbacMetrics>,
    audit: AuditLog,
    cancel: CancellationToken,
}

impl RbacInterceptor {
    pub fn new(bus: Arc<BusClient>, coordinator_name: &str, config: RbacConfig) -> Result<Self> {
        let rules = RuleSet::compile(&config.rules)?;
        Ok(Self {
            coordinator_name: coordinator_name.to_string(),
            source: format!("coordinator:{}", coordinator_name),
            audit: AuditLog::new(coordinator_name),
            bus,
            rules,
            pending: PendingQueue::new(config.max_queue_size),
            metrics: Arc::new(RbacMetrics::new()),
            cancel: CancellationToken::new(),
            config,
        })
    }

    pub fn metrics(&self) -> &Arc<RbacMetrics> {
        &self.metrics
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn pending_depth(&self) -> usize {
        self.pending.depth()
    }

    /// Wire subscriptions and start the sweeper and metrics loops
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let this = Arc::clone(self);
        self.bus
            .subscribe(topic::COORDINATOR_WILDCARD, QoS::AtLeastOnce, move |msg| {
                let this = Arc::clone(&this);
                async move {
                    this.handle_intercepted(&msg.topic, &msg.payload).await;
                }
            })
            .await?;

        let this = Arc::clone(self);
        self.bus
            .subscribe(topic::RBAC_RESPONSE, QoS::AtLeastOnce, move |msg| {
                let this = Arc::clone(&this);
                async move {
                    this.handle_response(&msg.payload).await;
                }
            })
            .await?;

        let update_topic = topic::config_update(&self.coordinator_name);
        let this = Arc::clone(self);
        self.bus
            .subscribe(&update_topic, QoS::AtLeastOnce, move |msg| {
                let this = Arc::clone(&this);
                async move {
                    this.handle_rules_update(&msg.payload);
                }
            })
            .await?;

        let this = Arc::clone(self);
        tokio::spawn(async move { this.sweeper_loop().await });

        if self.config.metrics_interval_secs > 0 {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.metrics_loop().await });
        }

        tracing::info!(
            rules = self.rules.len(),
            max_queue = self.config.max_queue_size,
            enabled = self.config.enabled,
            "RBAC interceptor started"
        );
        Ok(())
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Classify one delivered message without touching queue or counters
    pub(crate) fn decide(&self, msg_topic: &str, payload: &[u8]) -> Decision {
        if msg_topic == topic::RBAC_VALIDATE || msg_topic == topic::RBAC_RESPONSE {
            return Decision::Plumbing;
        }

        if topic::has_segment(msg_topic, "health") || topic::has_segment(msg_topic, "status") {
            return Decision::HealthBypass;
        }

        if !self.config.enabled {
            return Decision::Disabled;
        }

        let rule = match self.rules.match_topic(msg_topic) {
            Some(rule) => rule,
            None => return Decision::Unmatched,
        };

        let envelope = match Envelope::from_bytes(payload) {
            Ok(envelope) => envelope,
            Err(e) => return Decision::Malformed(e.to_string()),
        };

        if envelope.is_authorized() {
            return Decision::AlreadyAuthorized;
        }

        let context = UserContext::from_payload(&envelope.payload);
        Decision::Validate { rule, context }
    }

    /// Intercept path: bypass, reject, or park for validation
    ///
    /// Returns without blocking on the verdict; the response handler and the
    /// sweeper own the terminal transitions.
    pub async fn handle_intercepted(&self, msg_topic: &str, payload: &[u8]) {
        let (rule, context) = match self.decide(msg_topic, payload) {
            Decision::Plumbing | Decision::AlreadyAuthorized => return,
            Decision::HealthBypass | Decision::Disabled | Decision::Unmatched => return,
            Decision::Malformed(reason) => {
                self.metrics.incr_processed();
                self.metrics.incr_validation_errors();
                self.audit.record(
                    &AuditRecord::new(
                        "unknown",
                        msg_topic,
                        "unknown",
                        "unknown",
                        "",
                        AuditOutcome::Rejected,
                    )
                    .with_reason(reason),
                );
                return;
            }
            Decision::Validate { rule, context } => (rule, context),
        };

        self.metrics.incr_processed();

        let correlation_id = ResponseCorrelator::next_correlation_id();
        let now = Instant::now();
        let record = PendingValidation {
            correlation_id: correlation_id.clone(),
            original_topic: msg_topic.to_string(),
            original_payload: payload.to_vec(),
            user_context: context.clone(),
            resource: rule.resource.clone(),
            action: rule.action.clone(),
            received_at: now,
            expires_at: now + self.config.validation_timeout(),
        };

        if let Err(e) = self.pending.insert(record) {
            match e {
                Error::QueueOverflow => {
                    self.metrics.incr_queue_overflows();
                    self.metrics.incr_rejected();
                    self.audit.record(
                        &AuditRecord::new(
                            &context.user_id,
                            msg_topic,
                            &rule.resource,
                            &rule.action,
                            &correlation_id,
                            AuditOutcome::Rejected,
                        )
                        .with_reason("validation queue overflow"),
                    );
                }
                other => {
                    self.metrics.incr_coordinator_errors();
                    tracing::error!("Failed to park pending validation: {}", other);
                }
            }
            self.refresh_gauge();
            return;
        }

        let request = RbacValidateRequest {
            correlation_id: correlation_id.clone(),
            user_id: context.user_id.clone(),
            resource: rule.resource.clone(),
            action: rule.action.clone(),
            context: context.clone(),
            timestamp: Utc::now(),
        };

        if let Err(e) = self.publish_validation_request(&request).await {
            // The security coordinator is unreachable; fail closed
            self.pending.remove(&correlation_id);
            self.metrics.incr_coordinator_errors();
            self.audit.record(
                &AuditRecord::new(
                    &context.user_id,
                    msg_topic,
                    &rule.resource,
                    &rule.action,
                    &correlation_id,
                    AuditOutcome::Error,
                )
                .with_reason(format!("validation request failed: {}", e)),
            );
        }

        self.refresh_gauge();
    }

    async fn publish_validation_request(&self, request: &RbacValidateRequest) -> Result<()> {
        let envelope = Envelope::wrap(MessageType::Request, &self.source, request)?;
        self.bus
            .publish(
                topic::RBAC_VALIDATE,
                QoS::AtLeastOnce,
                false,
                envelope.to_bytes()?,
            )
            .await
    }

    /// Verdict path: exactly one terminal transition per pending record
    pub async fn handle_response(&self, payload: &[u8]) {
        let response: RbacValidateResponse = match Envelope::from_bytes(payload)
            .and_then(|e| e.payload_as())
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Ignoring malformed RBAC response: {}", e);
                return;
            }
        };

        let record = match self.pending.remove(&response.correlation_id) {
            Some(record) => record,
            None => {
                // Already timed out or never ours; the verdict is dropped
                tracing::debug!(
                    correlation_id = %response.correlation_id,
                    "late RBAC response dropped"
                );
                self.audit.record(
                    &AuditRecord::new(
                        "unknown",
                        "unknown",
                        "unknown",
                        "unknown",
                        &response.correlation_id,
                        AuditOutcome::Error,
                    )
                    .with_reason("late or unknown correlation id"),
                );
                return;
            }
        };

        self.metrics.record_validation_time(record.received_at.elapsed());

        if response.allowed {
            self.metrics.incr_validated();
            match self.forward(&record).await {
                Ok(()) => {
                    self.metrics.incr_forwarded();
                    self.audit.record(&AuditRecord::new(
                        &record.user_context.user_id,
                        &record.original_topic,
                        &record.resource,
                        &record.action,
                        &record.correlation_id,
                        AuditOutcome::Forwarded,
                    ));
                }
                Err(e) => {
                    // The consumer times out on its own; we only count and audit
                    self.metrics.incr_coordinator_errors();
                    self.audit.record(
                        &AuditRecord::new(
                            &record.user_context.user_id,
                            &record.original_topic,
                            &record.resource,
                            &record.action,
                            &record.correlation_id,
                            AuditOutcome::Error,
                        )
                        .with_reason(format!("forward failed: {}", e)),
                    );
                }
            }
        } else {
            self.metrics.incr_rejected();
            self.audit.record(
                &AuditRecord::new(
                    &record.user_context.user_id,
                    &record.original_topic,
                    &record.resource,
                    &record.action,
                    &record.correlation_id,
                    AuditOutcome::Rejected,
                )
                .with_reason(response.reason.as_deref().unwrap_or("denied")),
            );
        }

        self.refresh_gauge();
    }

    /// Republish the original payload with the post-authorization marker
    async fn forward(&self, record: &PendingValidation) -> Result<()> {
        let bytes = mark_payload_authorized(&record.original_payload)?;
        self.bus
            .publish(&record.original_topic, QoS::AtLeastOnce, false, bytes)
            .await
    }

    /// Replace the active rule list from a config update message
    fn handle_rules_update(&self, payload: &[u8]) {
        let update: RulesUpdate = match Envelope::from_bytes(payload).and_then(|e| e.payload_as()) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!("Ignoring malformed rules update: {}", e);
                return;
            }
        };

        match self.rules.reload(&update.rules) {
            Ok(()) => tracing::info!(rules = self.rules.len(), "protection rules reloaded"),
            Err(e) => tracing::error!("Rules update rejected: {}", e),
        }
    }

    /// Evict expired pending records on a fixed cadence
    async fn sweeper_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {}
            }

            self.sweep_once(Instant::now());
        }
    }

    /// One sweeper pass; separated for tests
    pub(crate) fn sweep_once(&self, now: Instant) {
        for record in self.pending.sweep_expired(now) {
            self.metrics.incr_timeouts();
            self.audit.record(
                &AuditRecord::new(
                    &record.user_context.user_id,
                    &record.original_topic,
                    &record.resource,
                    &record.action,
                    &record.correlation_id,
                    AuditOutcome::TimedOut,
                )
                .with_reason("no verdict before expiry"),
            );
        }
        self.refresh_gauge();
    }

    /// Publish a metrics snapshot on the status topic
    async fn metrics_loop(self: Arc<Self>) {
        let metrics_topic = topic::rbac_metrics();
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            self.config.metrics_interval_secs,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {}
            }

            let snapshot = self.metrics.snapshot();
            let envelope = match Envelope::wrap(MessageType::Status, &self.source, &snapshot) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::error!("Failed to wrap metrics snapshot: {}", e);
                    continue;
                }
            };
            let bytes = match envelope.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("Failed to encode metrics snapshot: {}", e);
                    continue;
                }
            };
            if let Err(e) = self
                .bus
                .publish(&metrics_topic, QoS::AtMostOnce, false, bytes)
                .await
            {
                tracing::debug!("Metrics publish failed: {}", e);
            }
        }
    }

    fn refresh_gauge(&self) {
        self.metrics
            .set_queue_depth(self.pending.depth(), self.pending.high_water());
    }
}

/// Parse, stamp, and re-encode a payload cleared for forwarding
fn mark_payload_authorized(payload: &[u8]) -> Result<Vec<u8>> {
    Envelope::from_bytes(payload)?.mark_authorized().to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use serde_json::json;
    use std::time::Duration;

    const PROTECTED_TOPIC: &str = "bigskies/coordinator/telescope/control/slew";

    fn interceptor_with(config: RbacConfig) -> Arc<RbacInterceptor> {
        let bus = Arc::new(BusClient::new(BusConfig::default(), "message"));
        Arc::new(RbacInterceptor::new(bus, "message", config).unwrap())
    }

    fn protected_config() -> RbacConfig {
        RbacConfig {
            rules: vec![ProtectionRuleConfig {
                pattern: "bigskies/coordinator/telescope/control/+".to_string(),
                resource: "telescope".to_string(),
                action: "control".to_string(),
            }],
            ..RbacConfig::default()
        }
    }

    fn request_bytes(user_id: &str) -> Vec<u8> {
        Envelope::new(
            MessageType::Command,
            "coordinator:uielement",
            json!({"user_id": user_id, "command": "slew"}),
        )
        .to_bytes()
        .unwrap()
    }

    fn verdict_bytes(correlation_id: &str, allowed: bool, reason: Option<&str>) -> Vec<u8> {
        let response = RbacValidateResponse {
            correlation_id: correlation_id.to_string(),
            allowed,
            reason: reason.map(str::to_string),
            timestamp: Some(Utc::now()),
        };
        Envelope::wrap(MessageType::Response, "coordinator:security", &response)
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_and_status_always_bypass() {
        let interceptor = interceptor_with(protected_config());

        let d = interceptor.decide("bigskies/coordinator/telescope/health/probe", b"not-json");
        assert!(matches!(d, Decision::HealthBypass));

        let d = interceptor.decide("bigskies/coordinator/telescope/status/tick", b"not-json");
        assert!(matches!(d, Decision::HealthBypass));
    }

    #[tokio::test]
    async fn test_disabled_bypasses_everything() {
        let config = RbacConfig {
            enabled: false,
            ..protected_config()
        };
        let interceptor = interceptor_with(config);

        let d = interceptor.decide(PROTECTED_TOPIC, &request_bytes("u1"));
        assert!(matches!(d, Decision::Disabled));

        interceptor
            .handle_intercepted(PROTECTED_TOPIC, &request_bytes("u1"))
            .await;
        let snap = interceptor.metrics().snapshot();
        assert_eq!(snap.processed, 0);
        assert_eq!(snap.rejected, 0);
    }

    #[tokio::test]
    async fn test_unmatched_topic_bypasses() {
        let interceptor = interceptor_with(protected_config());
        let d = interceptor.decide("bigskies/coordinator/plugin/event/loaded", &request_bytes("u1"));
        assert!(matches!(d, Decision::Unmatched));
    }

    #[tokio::test]
    async fn test_empty_rule_list_forwards_everything() {
        let interceptor = interceptor_with(RbacConfig::default());
        let d = interceptor.decide(PROTECTED_TOPIC, &request_bytes("u1"));
        assert!(matches!(d, Decision::Unmatched));
    }

    #[tokio::test]
    async fn test_plumbing_topics_never_gated() {
        let interceptor = interceptor_with(protected_config());
        assert!(matches!(
            interceptor.decide(topic::RBAC_VALIDATE, b"x"),
            Decision::Plumbing
        ));
        assert!(matches!(
            interceptor.decide(topic::RBAC_RESPONSE, b"x"),
            Decision::Plumbing
        ));
    }

    #[tokio::test]
    async fn test_marked_republish_not_regated() {
        let interceptor = interceptor_with(protected_config());
        let marked = mark_payload_authorized(&request_bytes("u1")).unwrap();
        let d = interceptor.decide(PROTECTED_TOPIC, &marked);
        assert!(matches!(d, Decision::AlreadyAuthorized));
    }

    #[tokio::test]
    async fn test_malformed_envelope_fails_closed() {
        let interceptor = interceptor_with(protected_config());
        interceptor
            .handle_intercepted(PROTECTED_TOPIC, b"this is not json")
            .await;

        let snap = interceptor.metrics().snapshot();
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.validation_errors, 1);
        assert_eq!(snap.forwarded, 0);
        assert_eq!(interceptor.pending_depth(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_security_coordinator_fails_closed() {
        // The bus is never connected, so the validation request publish fails
        let interceptor = interceptor_with(protected_config());
        interceptor
            .handle_intercepted(PROTECTED_TOPIC, &request_bytes("u1"))
            .await;

        let snap = interceptor.metrics().snapshot();
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.coordinator_errors, 1);
        assert_eq!(snap.forwarded, 0);
        // The record was removed; nothing lingers for the sweeper
        assert_eq!(interceptor.pending_depth(), 0);
    }

    #[tokio::test]
    async fn test_deny_verdict_rejects_without_forwarding() {
        let interceptor = interceptor_with(protected_config());

        // Park a record directly; the publish path needs a broker
        let now = Instant::now();
        interceptor
            .pending
            .insert(PendingValidation {
                correlation_id: "c-1".to_string(),
                original_topic: PROTECTED_TOPIC.to_string(),
                original_payload: request_bytes("u1"),
                user_context: UserContext {
                    user_id: "u1".to_string(),
                    username: None,
                    token: None,
                },
                resource: "telescope".to_string(),
                action: "control".to_string(),
                received_at: now,
                expires_at: now + Duration::from_secs(30),
            })
            .unwrap();

        interceptor
            .handle_response(&verdict_bytes("c-1", false, Some("no-grant")))
            .await;

        let snap = interceptor.metrics().snapshot();
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.forwarded, 0);
        assert_eq!(snap.validation_count, 1);
        assert_eq!(interceptor.pending_depth(), 0);
    }

    #[tokio::test]
    async fn test_allow_verdict_with_dead_bus_counts_coordinator_error() {
        let interceptor = interceptor_with(protected_config());

        let now = Instant::now();
        interceptor
            .pending
            .insert(PendingValidation {
                correlation_id: "c-2".to_string(),
                original_topic: PROTECTED_TOPIC.to_string(),
                original_payload: request_bytes("u1"),
                user_context: UserContext::anonymous(),
                resource: "telescope".to_string(),
                action: "control".to_string(),
                received_at: now,
                expires_at: now + Duration::from_secs(30),
            })
            .unwrap();

        interceptor.handle_response(&verdict_bytes("c-2", true, None)).await;

        let snap = interceptor.metrics().snapshot();
        assert_eq!(snap.validated, 1);
        assert_eq!(snap.forwarded, 0);
        assert_eq!(snap.coordinator_errors, 1);
        assert_eq!(interceptor.pending_depth(), 0);
    }

    #[tokio::test]
    async fn test_late_response_is_dropped_without_counters() {
        let interceptor = interceptor_with(protected_config());
        interceptor
            .handle_response(&verdict_bytes("never-seen", true, None))
            .await;

        let snap = interceptor.metrics().snapshot();
        assert_eq!(snap.forwarded, 0);
        assert_eq!(snap.rejected, 0);
        assert_eq!(snap.timeouts, 0);
        assert_eq!(snap.validated, 0);
    }

    #[tokio::test]
    async fn test_sweeper_times_out_expired_records() {
        let interceptor = interceptor_with(protected_config());

        let now = Instant::now();
        interceptor
            .pending
            .insert(PendingValidation {
                correlation_id: "c-3".to_string(),
                original_topic: PROTECTED_TOPIC.to_string(),
                original_payload: request_bytes("u1"),
                user_context: UserContext::anonymous(),
                resource: "telescope".to_string(),
                action: "control".to_string(),
                received_at: now,
                expires_at: now,
            })
            .unwrap();

        interceptor.sweep_once(now + Duration::from_millis(1));

        let snap = interceptor.metrics().snapshot();
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.queue_depth, 0);

        // A verdict arriving after the sweep is a late response: no decrement,
        // no forward
        interceptor.handle_response(&verdict_bytes("c-3", true, None)).await;
        let snap = interceptor.metrics().snapshot();
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.forwarded, 0);
    }

    #[tokio::test]
    async fn test_queue_overflow_rejects_new_arrivals() {
        let config = RbacConfig {
            max_queue_size: 1,
            ..protected_config()
        };
        let interceptor = interceptor_with(config);

        let now = Instant::now();
        interceptor
            .pending
            .insert(PendingValidation {
                correlation_id: "c-4".to_string(),
                original_topic: PROTECTED_TOPIC.to_string(),
                original_payload: request_bytes("u1"),
                user_context: UserContext::anonymous(),
                resource: "telescope".to_string(),
                action: "control".to_string(),
                received_at: now,
                expires_at: now + Duration::from_secs(30),
            })
            .unwrap();

        interceptor
            .handle_intercepted(PROTECTED_TOPIC, &request_bytes("u2"))
            .await;

        let snap = interceptor.metrics().snapshot();
        assert_eq!(snap.queue_overflows, 1);
        assert_eq!(snap.rejected, 1);
        assert_eq!(interceptor.pending_depth(), 1);
    }

    #[tokio::test]
    async fn test_counter_identity_holds() {
        let interceptor = interceptor_with(protected_config());

        // malformed -> validation_errors
        interceptor.handle_intercepted(PROTECTED_TOPIC, b"junk").await;
        // unreachable security -> coordinator_errors
        interceptor
            .handle_intercepted(PROTECTED_TOPIC, &request_bytes("u1"))
            .await;

        let snap = interceptor.metrics().snapshot();
        assert_eq!(
            snap.processed,
            snap.forwarded
                + snap.rejected
                + snap.timeouts
                + snap.validation_errors
                + snap.coordinator_errors
        );
    }

    #[test]
    fn test_mark_payload_round_trip() {
        let original = Envelope::new(
            MessageType::Command,
            "coordinator:uielement",
            json!({"user_id": "u1"}),
        );
        let marked = mark_payload_authorized(&original.to_bytes().unwrap()).unwrap();
        let envelope = Envelope::from_bytes(&marked).unwrap();
        assert!(envelope.is_authorized());
        assert_eq!(envelope.id, original.id);
        assert_eq!(envelope.payload, original.payload);
    }
}

//! Service registry fed by application-coordinator events
//!
//! Registrations and heartbeats arrive on the service event topics; a
//! registered service whose last heartbeat is older than the configured
//! timeout is reported unhealthy through the health engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use rumqttc::QoS;

use crate::bus::{topic, BusClient, Envelope};
use crate::error::Result;
use crate::health::{CheckResult, Checker};
use crate::messages::{ServiceHeartbeat, ServiceRegistration};

#[derive(Debug, Clone)]
struct ServiceEntry {
    version: Option<String>,
    last_heartbeat: Instant,
}

/// Heartbeat tracker for registered services
pub struct ServiceRegistry {
    services: DashMap<String, ServiceEntry>,
    service_timeout: Duration,
}

impl ServiceRegistry {
    pub fn new(service_timeout: Duration) -> Self {
        Self {
            services: DashMap::new(),
            service_timeout,
        }
    }

    /// Subscribe to the registration and heartbeat topics
    pub async fn attach(self: &Arc<Self>, bus: &Arc<BusClient>) -> Result<()> {
        let registry = Arc::clone(self);
        bus.subscribe(topic::SERVICE_REGISTER, QoS::AtLeastOnce, move |msg| {
            let registry = Arc::clone(&registry);
            async move {
                match Envelope::from_bytes(&msg.payload)
                    .and_then(|e| e.payload_as::<ServiceRegistration>())
                {
                    Ok(reg) => registry.observe_registration(&reg),
                    Err(e) => tracing::warn!("Ignoring malformed service registration: {}", e),
                }
            }
        })
        .await?;

        let registry = Arc::clone(self);
        bus.subscribe(topic::SERVICE_HEARTBEAT, QoS::AtLeastOnce, move |msg| {
            let registry = Arc::clone(&registry);
            async move {
                match Envelope::from_bytes(&msg.payload)
                    .and_then(|e| e.payload_as::<ServiceHeartbeat>())
                {
                    Ok(hb) => registry.observe_heartbeat(&hb),
                    Err(e) => tracing::warn!("Ignoring malformed service heartbeat: {}", e),
                }
            }
        })
        .await?;

        Ok(())
    }

    pub fn observe_registration(&self, registration: &ServiceRegistration) {
        tracing::info!(
            service = %registration.service,
            version = registration.version.as_deref().unwrap_or("unknown"),
            "service registered"
        );
        self.services.insert(
            registration.service.clone(),
            ServiceEntry {
                version: registration.version.clone(),
                last_heartbeat: Instant::now(),
            },
        );
    }

    pub fn observe_heartbeat(&self, heartbeat: &ServiceHeartbeat) {
        match self.services.get_mut(&heartbeat.service) {
            Some(mut entry) => entry.last_heartbeat = Instant::now(),
            None => {
                // A heartbeat from a service we never saw register still
                // counts as liveness
                self.services.insert(
                    heartbeat.service.clone(),
                    ServiceEntry {
                        version: None,
                        last_heartbeat: Instant::now(),
                    },
                );
            }
        }
    }

    /// Names of services with no heartbeat inside the timeout window
    pub fn stale_services(&self) -> Vec<String> {
        let now = Instant::now();
        self.services
            .iter()
            .filter(|entry| now.duration_since(entry.value().last_heartbeat) > self.service_timeout)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn registered_count(&self) -> usize {
        self.services.len()
    }

    pub fn service_version(&self, service: &str) -> Option<String> {
        self.services
            .get(service)
            .and_then(|e| e.value().version.clone())
    }
}

#[async_trait]
impl Checker for ServiceRegistry {
    fn name(&self) -> &str {
        "service-registry"
    }

    async fn check(&self) -> CheckResult {
        let stale = self.stale_services();
        if stale.is_empty() {
            CheckResult::healthy()
        } else {
            CheckResult::unhealthy(format!("missing heartbeats: {}", stale.join(", ")))
        }
    }
}

//! Credentials bootstrap handshake
//!
//! A coordinator must not touch the datastore until the bootstrap publisher
//! has delivered a credentials bundle on the retained bootstrap topic. The
//! handshake subscribes, optionally announces itself on the request topic,
//! and blocks callers until the bundle arrives or the wait times out.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::QoS;
use tokio::sync::{Mutex, Notify};

use crate::bus::{topic, BusClient, Envelope, MessageType};
use crate::config::CredentialsConfig;
use crate::error::{Error, Result};
use crate::messages::{CredentialsBundle, CredentialsRequest};

struct HandshakeState {
    bundle: Mutex<Option<CredentialsBundle>>,
    received: Notify,
}

/// Bootstrap handshake for one coordinator
pub struct CredentialsHandshake {
    bus: Arc<BusClient>,
    coordinator: String,
    config: CredentialsConfig,
    state: Arc<HandshakeState>,
}

impl CredentialsHandshake {
    pub fn new(bus: Arc<BusClient>, coordinator: &str, config: CredentialsConfig) -> Self {
        Self {
            bus,
            coordinator: coordinator.to_string(),
            config,
            state: Arc::new(HandshakeState {
                bundle: Mutex::new(None),
                received: Notify::new(),
            }),
        }
    }

    /// Subscribe to the bootstrap topic and optionally announce ourselves
    ///
    /// Call once after the bus is connected; the retained credentials message
    /// is delivered immediately when one exists.
    pub async fn begin(&self) -> Result<()> {
        let state = Arc::clone(&self.state);
        let coordinator = self.coordinator.clone();

        self.bus
            .subscribe(topic::BOOTSTRAP_CREDENTIALS, QoS::AtLeastOnce, move |msg| {
                let state = Arc::clone(&state);
                let coordinator = coordinator.clone();
                async move {
                    let envelope = match Envelope::from_bytes(&msg.payload) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            tracing::warn!("Ignoring malformed credentials message: {}", e);
                            return;
                        }
                    };

                    let bundle: CredentialsBundle = match envelope.payload_as() {
                        Ok(bundle) => bundle,
                        Err(e) => {
                            tracing::warn!("Ignoring malformed credentials bundle: {}", e);
                            return;
                        }
                    };

                    tracing::info!(
                        "Credentials received for {} (database {}@{}:{})",
                        coordinator,
                        bundle.database,
                        bundle.host,
                        bundle.port
                    );

                    *state.bundle.lock().await = Some(bundle);
                    state.received.notify_waiters();
                }
            })
            .await?;

        if self.config.request_on_start {
            let request = CredentialsRequest {
                coordinator: self.coordinator.clone(),
            };
            let envelope = Envelope::wrap(
                MessageType::Request,
                format!("coordinator:{}", self.coordinator),
                &request,
            )?;
            self.bus
                .publish(
                    topic::BOOTSTRAP_REQUEST,
                    QoS::AtLeastOnce,
                    false,
                    envelope.to_bytes()?,
                )
                .await?;
        }

        Ok(())
    }

    /// Block until the bundle is available
    ///
    /// Returns the cached bundle on every call after the first delivery.
    pub async fn wait_for_credentials(&self, timeout: Duration) -> Result<CredentialsBundle> {
        let wait = async {
            loop {
                // Register before checking so a delivery between the check
                // and the await cannot be missed
                let notified = self.state.received.notified();
                if let Some(bundle) = self.state.bundle.lock().await.clone() {
                    return bundle;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::CredentialsTimeout)
    }

    /// Wait using the configured timeout
    pub async fn wait(&self) -> Result<CredentialsBundle> {
        self.wait_for_credentials(self.config.wait_timeout()).await
    }

    /// The bundle, when already delivered
    pub async fn cached(&self) -> Option<CredentialsBundle> {
        self.state.bundle.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;

    fn handshake() -> CredentialsHandshake {
        let bus = Arc::new(BusClient::new(BusConfig::default(), "datastore"));
        CredentialsHandshake::new(bus, "datastore", CredentialsConfig::default())
    }

    fn bundle() -> CredentialsBundle {
        CredentialsBundle {
            host: "db".to_string(),
            port: 5432,
            database: "bigskies".to_string(),
            user: "svc".to_string(),
            secret: "pw".to_string(),
        }
    }

    #[tokio::test]
    async fn test_wait_times_out_without_bundle() {
        let hs = handshake();
        let err = hs
            .wait_for_credentials(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CredentialsTimeout));
    }

    #[tokio::test]
    async fn test_wait_returns_cached_bundle() {
        let hs = handshake();
        *hs.state.bundle.lock().await = Some(bundle());

        let got = hs
            .wait_for_credentials(Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(got, bundle());

        // Subsequent calls keep returning the cached bundle
        let again = hs
            .wait_for_credentials(Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(again, bundle());
    }

    #[tokio::test]
    async fn test_delivery_releases_waiter() {
        let hs = Arc::new(handshake());

        let waiter = {
            let hs = Arc::clone(&hs);
            tokio::spawn(async move { hs.wait_for_credentials(Duration::from_secs(5)).await })
        };

        // Give the waiter a chance to park
        tokio::time::sleep(Duration::from_millis(10)).await;
        *hs.state.bundle.lock().await = Some(bundle());
        hs.state.received.notify_waiters();

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.database, "bigskies");
    }
}

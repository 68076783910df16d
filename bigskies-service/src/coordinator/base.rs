//! Base coordinator lifecycle
//!
//! Every coordinator shares the same skeleton: an owned bus client, an owned
//! health engine published on the bus, a LIFO stack of shutdown functions,
//! a credentials handshake, and the request/response correlator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rumqttc::QoS;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bus::{topic, BusClient, Envelope, MessageType};
use crate::config::Config;
use crate::coordinator::correlator::ResponseCorrelator;
use crate::coordinator::credentials::CredentialsHandshake;
use crate::error::Result;
use crate::health::HealthEngine;

/// A deferred teardown action, run in reverse registration order on stop
pub type ShutdownFunc = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Shared coordinator runtime
pub struct Coordinator {
    name: String,
    bus: Arc<BusClient>,
    health: Arc<HealthEngine>,
    correlator: Arc<ResponseCorrelator>,
    credentials: CredentialsHandshake,
    config: Config,
    shutdown_funcs: Mutex<Vec<ShutdownFunc>>,
    running: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Build the runtime for a named coordinator; no network activity yet
    pub fn new(config: Config) -> Self {
        let name = config.service.name.clone();
        let bus = Arc::new(BusClient::new(config.bus.clone(), &name));
        let health = Arc::new(HealthEngine::new(config.health.check_timeout()));
        let correlator = Arc::new(ResponseCorrelator::new(Arc::clone(&bus)));
        let credentials =
            CredentialsHandshake::new(Arc::clone(&bus), &name, config.credentials.clone());

        Self {
            name,
            bus,
            health,
            correlator,
            credentials,
            config,
            shutdown_funcs: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            started_at: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical publisher identifier used in envelopes
    pub fn source(&self) -> String {
        format!("coordinator:{}", self.name)
    }

    pub fn bus(&self) -> &Arc<BusClient> {
        &self.bus
    }

    pub fn health(&self) -> &Arc<HealthEngine> {
        &self.health
    }

    pub fn correlator(&self) -> &Arc<ResponseCorrelator> {
        &self.correlator
    }

    pub fn credentials(&self) -> &CredentialsHandshake {
        &self.credentials
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock().await
    }

    /// Token cancelled when the coordinator stops
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Register a teardown action; actions run LIFO on stop
    pub async fn push_shutdown(&self, func: ShutdownFunc) {
        self.shutdown_funcs.lock().await.push(func);
    }

    /// Connect the bus, launch health publication, and mark running
    ///
    /// Idempotent: a second start on a running coordinator is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("Coordinator {} already running", self.name);
            return Ok(());
        }

        tracing::info!("Starting coordinator {}", self.name);

        if let Err(e) = self.bus.connect().await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        *self.started_at.lock().await = Some(Utc::now());

        if self.config.health.publish_enabled {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.publish_health_loop().await });
        }

        tracing::info!("Coordinator {} started", self.name);
        Ok(())
    }

    /// Periodically publish the aggregated health report
    ///
    /// The initial delay gives subscribers a chance to attach before the
    /// first report goes out.
    async fn publish_health_loop(self: Arc<Self>) {
        let health_topic = topic::health(&self.name);

        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(self.config.health.initial_delay()) => {}
        }

        let mut interval = tokio::time::interval(self.config.health.publish_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {}
            }

            let report = self.health.check_all().await;
            let envelope = match Envelope::wrap(MessageType::Status, self.source(), &report) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::error!("Failed to wrap health report: {}", e);
                    continue;
                }
            };

            match envelope.to_bytes() {
                Ok(bytes) => {
                    if let Err(e) = self
                        .bus
                        .publish(&health_topic, QoS::AtLeastOnce, false, bytes)
                        .await
                    {
                        tracing::warn!("Health publish for {} failed: {}", self.name, e);
                    }
                }
                Err(e) => tracing::error!("Failed to encode health report: {}", e),
            }
        }
    }

    /// Run shutdown functions in reverse order, stop background loops, and
    /// disconnect the bus
    ///
    /// A failing shutdown function is logged and does not abort the rest of
    /// the teardown. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!("Stopping coordinator {}", self.name);

        let mut funcs = self.shutdown_funcs.lock().await;
        while let Some(func) = funcs.pop() {
            if let Err(e) = func().await {
                tracing::error!("Shutdown function for {} failed: {}", self.name, e);
            }
        }
        drop(funcs);

        self.correlator.shutdown();
        self.cancel.cancel();
        self.bus.disconnect().await?;
        *self.started_at.lock().await = None;

        tracing::info!("Coordinator {} stopped", self.name);
        Ok(())
    }
}

//! MQTT bus client
//!
//! Wraps a `rumqttc` async client and its event loop behind the fleet's bus
//! abstraction: bounded-backoff connect, wildcard subscriptions dispatched to
//! registered handlers, and automatic re-subscription after a reconnect.
//! Publishing while the broker session is down fails fast instead of queuing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::bus::topic::TopicFilter;
use crate::config::BusConfig;
use crate::error::{Error, Result};

/// A message delivered to a subscription handler
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Concrete topic the message arrived on
    pub topic: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

type MessageHandler = Arc<dyn Fn(IncomingMessage) -> BoxFuture<'static, ()> + Send + Sync>;

struct SubscriptionEntry {
    filter: TopicFilter,
    qos: QoS,
    handler: MessageHandler,
}

/// Map a numeric QoS level to the transport enum
pub fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Shared bus client owned by a coordinator
pub struct BusClient {
    client_id: String,
    config: BusConfig,
    client: AsyncClient,
    eventloop: Mutex<Option<EventLoop>>,
    connected: Arc<AtomicBool>,
    connack: Arc<Notify>,
    subscriptions: Arc<DashMap<String, SubscriptionEntry>>,
    cancel: CancellationToken,
    driver_started: AtomicBool,
}

impl BusClient {
    /// Build a client for the configured broker; no network activity yet
    pub fn new(config: BusConfig, coordinator_name: &str) -> Self {
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("bigskies-{}", coordinator_name));

        let mut options = MqttOptions::new(&client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive());
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity);

        Self {
            client_id,
            config,
            client,
            eventloop: Mutex::new(Some(eventloop)),
            connected: Arc::new(AtomicBool::new(false)),
            connack: Arc::new(Notify::new()),
            subscriptions: Arc::new(DashMap::new()),
            cancel: CancellationToken::new(),
            driver_started: AtomicBool::new(false),
        }
    }

    /// The MQTT client identifier in use
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether a broker session is currently established
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Establish the broker session
    ///
    /// Idempotent: the first call spawns the event-loop driver and waits for
    /// the broker to acknowledge; later calls return immediately once
    /// connected. The driver keeps reconnecting with exponential backoff up
    /// to the configured maximum interval for the life of the client.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        if !self.driver_started.swap(true, Ordering::SeqCst) {
            let eventloop = self
                .eventloop
                .lock()
                .await
                .take()
                .ok_or_else(|| Error::Internal("bus event loop already taken".to_string()))?;
            let this = Arc::clone(self);
            tokio::spawn(async move { this.drive(eventloop).await });
        }

        // The event loop retries on its own; bound the overall wait the way a
        // fixed retry budget would.
        let deadline = self.config.connect_timeout() * (self.config.max_retries + 1);
        let wait = async {
            loop {
                // Register for the notification before re-checking the flag
                // so a ConnAck between the two cannot be missed
                let notified = self.connack.notified();
                if self.is_connected() {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(deadline, wait).await {
            Ok(()) => {
                tracing::info!(
                    "Bus client {} connected to {}:{}",
                    self.client_id,
                    self.config.host,
                    self.config.port
                );
                Ok(())
            }
            Err(_) => Err(Error::Bus(format!(
                "failed to connect to broker {}:{} within {:?}",
                self.config.host, self.config.port, deadline
            ))),
        }
    }

    /// Event-loop driver: dispatch publishes, track session state, reconnect
    async fn drive(self: Arc<Self>, mut eventloop: EventLoop) {
        let base_delay = Duration::from_secs(self.config.reconnect_delay_secs.max(1));
        let max_delay = Duration::from_secs(self.config.max_reconnect_interval_secs.max(1));
        let mut delay = base_delay;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Bus driver for {} stopping", self.client_id);
                    return;
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        delay = base_delay;
                        self.restore_subscriptions().await;
                        self.connected.store(true, Ordering::SeqCst);
                        self.connack.notify_waiters();
                        tracing::info!("Bus session established for {}", self.client_id);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.dispatch(publish.topic, publish.payload.to_vec());
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        self.connected.store(false, Ordering::SeqCst);
                        tracing::warn!("Broker disconnected {}", self.client_id);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let was_connected = self.connected.swap(false, Ordering::SeqCst);
                        if was_connected {
                            tracing::warn!("Bus connection lost for {}: {}", self.client_id, e);
                        } else {
                            tracing::debug!(
                                "Bus connection attempt failed for {}: {}. Retrying in {:?}",
                                self.client_id,
                                e,
                                delay
                            );
                        }

                        tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        delay = (delay * 2).min(max_delay);
                    }
                }
            }
        }
    }

    /// Re-issue every registered subscription after a (re)connect
    ///
    /// Runs before the connected flag flips so delivery resumes only once the
    /// broker has the full subscription set again.
    async fn restore_subscriptions(&self) {
        // Snapshot first: subscribing awaits, and map guards must not be
        // held across an await
        let patterns: Vec<(String, QoS)> = self
            .subscriptions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().qos))
            .collect();

        for (pattern, qos) in patterns {
            if let Err(e) = self.client.subscribe(pattern.clone(), qos).await {
                tracing::error!("Failed to restore subscription '{}': {}", pattern, e);
            }
        }
    }

    /// Invoke every matching handler for a delivered message
    ///
    /// Handlers run on their own tasks so a slow handler cannot stall the
    /// event loop.
    fn dispatch(&self, topic: String, payload: Vec<u8>) {
        for entry in self.subscriptions.iter() {
            if entry.value().filter.matches(&topic) {
                let handler = Arc::clone(&entry.value().handler);
                let message = IncomingMessage {
                    topic: topic.clone(),
                    payload: payload.clone(),
                };
                tokio::spawn(async move { handler(message).await });
            }
        }
    }

    /// Publish raw bytes
    ///
    /// Fails fast with `BusNotConnected` while the session is down; nothing
    /// is queued locally.
    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retained: bool,
        payload: Vec<u8>,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::BusNotConnected);
        }

        self.client
            .publish(topic, qos, retained, payload)
            .await
            .map_err(|e| Error::Bus(format!("publish to '{}' failed: {}", topic, e)))
    }

    /// Publish a serializable value as JSON
    pub async fn publish_json<T: serde::Serialize>(
        &self,
        topic: &str,
        qos: QoS,
        retained: bool,
        payload: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| Error::Internal(format!("failed to serialize payload: {}", e)))?;
        self.publish(topic, qos, retained, bytes).await
    }

    /// Register a handler for a topic pattern and subscribe
    ///
    /// The subscription survives reconnects. Registering before `connect()`
    /// is allowed; the pattern is subscribed as soon as a session exists.
    pub async fn subscribe<F, Fut>(&self, pattern: &str, qos: QoS, handler: F) -> Result<()>
    where
        F: Fn(IncomingMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let filter = TopicFilter::parse(pattern)?;
        let handler: MessageHandler =
            Arc::new(move |msg| Box::pin(handler(msg)) as BoxFuture<'static, ()>);

        self.subscriptions.insert(
            pattern.to_string(),
            SubscriptionEntry {
                filter,
                qos,
                handler,
            },
        );

        if self.is_connected() {
            self.client
                .subscribe(pattern, qos)
                .await
                .map_err(|e| Error::Bus(format!("subscribe to '{}' failed: {}", pattern, e)))?;
        }

        Ok(())
    }

    /// Drop a subscription
    pub async fn unsubscribe(&self, pattern: &str) -> Result<()> {
        self.subscriptions.remove(pattern);

        if self.is_connected() {
            self.client
                .unsubscribe(pattern)
                .await
                .map_err(|e| Error::Bus(format!("unsubscribe from '{}' failed: {}", pattern, e)))?;
        }

        Ok(())
    }

    /// Tear down the session and stop the driver
    pub async fn disconnect(&self) -> Result<()> {
        self.cancel.cancel();
        self.connected.store(false, Ordering::SeqCst);
        // The broker may already be gone; a failed DISCONNECT is not an error
        // worth surfacing during shutdown.
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!("Disconnect for {} returned: {}", self.client_id, e);
        }
        Ok(())
    }
}

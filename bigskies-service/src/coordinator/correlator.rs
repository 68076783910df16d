//! Correlated request/response over publish/subscribe
//!
//! A waiter is registered under a fresh correlation id, the request is
//! published, and the caller blocks until the matching response is delivered
//! or the timeout elapses. Responses for evicted ids are dropped.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rumqttc::QoS;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::BusClient;
use crate::error::{Error, Result};

/// Maps in-flight correlation ids to response waiters
pub struct ResponseCorrelator {
    bus: Arc<BusClient>,
    waiters: DashMap<String, oneshot::Sender<Vec<u8>>>,
    cancel: CancellationToken,
}

impl ResponseCorrelator {
    pub fn new(bus: Arc<BusClient>) -> Self {
        Self {
            bus,
            waiters: DashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Generate a fresh correlation id
    ///
    /// UUIDs make duplicate registrations impossible by construction; the
    /// insert path still guards against reuse.
    pub fn next_correlation_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Number of in-flight waiters
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }

    /// Publish a request and block for the correlated response
    ///
    /// `build_payload` receives the generated correlation id and returns the
    /// request bytes carrying it. On timeout the waiter is deregistered and
    /// `Error::Timeout` returned; a response arriving afterwards is dropped
    /// by `complete`.
    pub async fn publish_and_wait<F>(
        &self,
        topic: &str,
        qos: QoS,
        timeout: Duration,
        build_payload: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce(&str) -> Result<Vec<u8>>,
    {
        let correlation_id = Self::next_correlation_id();
        let payload = build_payload(&correlation_id)?;

        let (tx, rx) = oneshot::channel();
        if self.waiters.insert(correlation_id.clone(), tx).is_some() {
            return Err(Error::Internal(format!(
                "duplicate correlation id {}",
                correlation_id
            )));
        }

        if let Err(e) = self.bus.publish(topic, qos, false, payload).await {
            self.waiters.remove(&correlation_id);
            return Err(e);
        }

        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.waiters.remove(&correlation_id);
                Err(Error::Cancelled)
            }
            outcome = tokio::time::timeout(timeout, rx) => match outcome {
                Ok(Ok(bytes)) => Ok(bytes),
                // Sender dropped without a response: torn down by shutdown
                Ok(Err(_)) => Err(Error::Cancelled),
                Err(_) => {
                    self.waiters.remove(&correlation_id);
                    Err(Error::Timeout(format!(
                        "no response for correlation id {} within {:?}",
                        correlation_id, timeout
                    )))
                }
            }
        }
    }

    /// Deliver a response to its waiter
    ///
    /// Returns false when no waiter exists (already timed out, completed, or
    /// never known); the response is dropped in that case.
    pub fn complete(&self, correlation_id: &str, response: Vec<u8>) -> bool {
        match self.waiters.remove(correlation_id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => {
                tracing::debug!(
                    correlation_id,
                    "late or unknown response dropped"
                );
                false
            }
        }
    }

    /// Fail every outstanding waiter and stop accepting completions
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.waiters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;

    fn correlator() -> Arc<ResponseCorrelator> {
        let bus = Arc::new(BusClient::new(BusConfig::default(), "test"));
        Arc::new(ResponseCorrelator::new(bus))
    }

    #[test]
    fn test_correlation_ids_unique() {
        let a = ResponseCorrelator::next_correlation_id();
        let b = ResponseCorrelator::next_correlation_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_complete_without_waiter_is_dropped() {
        let c = correlator();
        assert!(!c.complete("nobody-home", b"late".to_vec()));
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_deregisters_waiter() {
        // The bus is never connected, so the publish fails fast; the waiter
        // must not leak.
        let c = correlator();
        let err = c
            .publish_and_wait(
                "bigskies/coordinator/security/rbac/validate",
                QoS::AtLeastOnce,
                Duration::from_millis(100),
                |_id| Ok(b"{}".to_vec()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BusNotConnected));
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test]
    async fn test_waiter_resolution() {
        let c = correlator();

        // Register a waiter directly, bypassing publish
        let (tx, rx) = oneshot::channel();
        c.waiters.insert("c-1".to_string(), tx);

        assert!(c.complete("c-1", b"verdict".to_vec()));
        assert_eq!(rx.await.unwrap(), b"verdict".to_vec());

        // At most one waiter resolves per id
        assert!(!c.complete("c-1", b"again".to_vec()));
    }

    #[tokio::test]
    async fn test_shutdown_clears_waiters() {
        let c = correlator();
        let (tx, mut rx) = oneshot::channel::<Vec<u8>>();
        c.waiters.insert("c-2".to_string(), tx);

        c.shutdown();
        assert_eq!(c.pending(), 0);
        // The receiver observes the dropped sender
        assert!(rx.try_recv().is_err());
    }
}

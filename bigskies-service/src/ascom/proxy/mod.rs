//! Device backend proxies
//!
//! A `DeviceProxy` hides which transport serves a device: HTTP to a remote
//! Alpaca server, request/response over the bus, or a local hardware
//! transport. Proxies are single-attempt; retry, backoff, and health state
//! live in the pool.

pub mod bus;
pub mod direct;
pub mod network;
pub mod pool;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub use bus::BusProxy;
pub use direct::{DirectProxy, HardwareTransport};
pub use network::NetworkProxy;
pub use pool::{ProxyPool, ProxyState, RoutingStrategy};

const EMA_ALPHA: f64 = 0.2;

/// Parameters of one device call
pub type DeviceParams = HashMap<String, String>;

/// One backend transport for a device
#[async_trait]
pub trait DeviceProxy: Send + Sync {
    /// Short transport label for logs and metrics
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Read a device property
    async fn get(&self, method: &str, params: &DeviceParams) -> Result<Value>;

    /// Invoke a device method
    async fn put(&self, method: &str, params: &DeviceParams) -> Result<Value>;

    /// Cheap probe used by the pool's periodic check
    async fn health_check(&self) -> Result<()>;

    fn metrics(&self) -> ProxyMetricsSnapshot;
}

/// Per-proxy request metrics
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    timestamps: Mutex<MetricTimestamps>,
    latency_ema_ms: Mutex<Option<f64>>,
    connection_state: Mutex<String>,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct MetricTimestamps {
    last_request: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
}

/// Serializable view of one proxy's metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyMetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub last_request_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub average_latency_ms: Option<f64>,
    pub connection_state: String,
    pub last_error: Option<String>,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self {
            connection_state: Mutex::new("disconnected".to_string()),
            ..Self::default()
        }
    }

    pub fn record_success(&self, latency: Duration) {
        let now = Utc::now();
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);

        let mut timestamps = self.timestamps.lock().expect("metrics lock poisoned");
        timestamps.last_request = Some(now);
        timestamps.last_success = Some(now);
        drop(timestamps);

        let ms = latency.as_secs_f64() * 1000.0;
        let mut ema = self.latency_ema_ms.lock().expect("metrics lock poisoned");
        *ema = Some(match *ema {
            Some(prev) => EMA_ALPHA * ms + (1.0 - EMA_ALPHA) * prev,
            None => ms,
        });
    }

    pub fn record_failure(&self, error: &crate::error::Error) {
        let now = Utc::now();
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);

        let mut timestamps = self.timestamps.lock().expect("metrics lock poisoned");
        timestamps.last_request = Some(now);
        timestamps.last_failure = Some(now);
        drop(timestamps);

        *self.last_error.lock().expect("metrics lock poisoned") = Some(error.to_string());
    }

    pub fn set_connection_state(&self, state: &str) {
        *self.connection_state.lock().expect("metrics lock poisoned") = state.to_string();
    }

    /// EMA latency, when at least one success was observed
    pub fn average_latency_ms(&self) -> Option<f64> {
        *self.latency_ema_ms.lock().expect("metrics lock poisoned")
    }

    pub fn snapshot(&self) -> ProxyMetricsSnapshot {
        let timestamps = *self.timestamps.lock().expect("metrics lock poisoned");
        ProxyMetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            last_request_at: timestamps.last_request,
            last_success_at: timestamps.last_success,
            last_failure_at: timestamps.last_failure,
            average_latency_ms: self.average_latency_ms(),
            connection_state: self
                .connection_state
                .lock()
                .expect("metrics lock poisoned")
                .clone(),
            last_error: self.last_error.lock().expect("metrics lock poisoned").clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_success_updates_counters_and_ema() {
        let metrics = ProxyMetrics::new();
        metrics.record_success(Duration::from_millis(100));
        metrics.record_success(Duration::from_millis(200));

        let snap = metrics.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.successful_requests, 2);
        assert_eq!(snap.failed_requests, 0);
        assert!(snap.last_success_at.is_some());
        // 100 -> EMA 100; then 0.2*200 + 0.8*100 = 120
        assert!((snap.average_latency_ms.unwrap() - 120.0).abs() < 1.0);
    }

    #[test]
    fn test_failure_records_error() {
        let metrics = ProxyMetrics::new();
        metrics.record_failure(&Error::Timeout("no response".to_string()));

        let snap = metrics.snapshot();
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.successful_requests, 0);
        assert!(snap.last_error.unwrap().contains("no response"));
        assert!(snap.last_failure_at.is_some());
        assert!(snap.average_latency_ms.is_none());
    }

    #[test]
    fn test_connection_state() {
        let metrics = ProxyMetrics::new();
        assert_eq!(metrics.snapshot().connection_state, "disconnected");
        metrics.set_connection_state("connected");
        assert_eq!(metrics.snapshot().connection_state, "connected");
    }
}

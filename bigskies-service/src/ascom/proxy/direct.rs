//! Direct proxy for local hardware transports
//!
//! The gateway itself never drives hardware; a deployment provides a
//! `HardwareTransport` (serial bridge, INDI adapter, vendor SDK wrapper) and
//! the proxy adapts it to the pool's interface.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::ascom::proxy::{DeviceParams, DeviceProxy, ProxyMetrics, ProxyMetricsSnapshot};
use crate::error::Result;

/// A local device transport supplied by the deployment
#[async_trait]
pub trait HardwareTransport: Send + Sync {
    async fn open(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Execute one device method; `write` distinguishes PUT from GET
    async fn execute(&self, method: &str, params: &DeviceParams, write: bool) -> Result<Value>;
}

/// Adapter from a `HardwareTransport` to the proxy interface
pub struct DirectProxy {
    transport: Arc<dyn HardwareTransport>,
    metrics: ProxyMetrics,
}

impl DirectProxy {
    pub fn new(transport: Arc<dyn HardwareTransport>) -> Self {
        Self {
            transport,
            metrics: ProxyMetrics::new(),
        }
    }

    async fn execute(&self, method: &str, params: &DeviceParams, write: bool) -> Result<Value> {
        let started = Instant::now();
        let outcome = self.transport.execute(method, params, write).await;
        match &outcome {
            Ok(_) => self.metrics.record_success(started.elapsed()),
            Err(e) => self.metrics.record_failure(e),
        }
        outcome
    }
}

#[async_trait]
impl DeviceProxy for DirectProxy {
    fn name(&self) -> &str {
        "direct"
    }

    async fn connect(&self) -> Result<()> {
        self.transport.open().await?;
        self.metrics.set_connection_state("connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.transport.close().await?;
        self.metrics.set_connection_state("disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    async fn get(&self, method: &str, params: &DeviceParams) -> Result<Value> {
        self.execute(method, params, false).await
    }

    async fn put(&self, method: &str, params: &DeviceParams) -> Result<Value> {
        self.execute(method, params, true).await
    }

    async fn health_check(&self) -> Result<()> {
        if self.transport.is_open() {
            Ok(())
        } else {
            Err(crate::error::Error::BackendUnavailable(
                "hardware transport is closed".to_string(),
            ))
        }
    }

    fn metrics(&self) -> ProxyMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeTransport {
        open: AtomicBool,
    }

    #[async_trait]
    impl HardwareTransport for FakeTransport {
        async fn open(&self) -> Result<()> {
            self.open.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.open.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn execute(&self, method: &str, _params: &DeviceParams, write: bool) -> Result<Value> {
            Ok(json!({"method": method, "write": write}))
        }
    }

    #[tokio::test]
    async fn test_lifecycle_and_dispatch() {
        let proxy = DirectProxy::new(Arc::new(FakeTransport {
            open: AtomicBool::new(false),
        }));

        assert!(!proxy.is_connected());
        assert!(proxy.health_check().await.is_err());

        proxy.connect().await.unwrap();
        assert!(proxy.is_connected());
        proxy.health_check().await.unwrap();

        let value = proxy.get("altitude", &DeviceParams::new()).await.unwrap();
        assert_eq!(value["write"], false);
        let value = proxy.put("park", &DeviceParams::new()).await.unwrap();
        assert_eq!(value["write"], true);

        assert_eq!(proxy.metrics().successful_requests, 2);

        proxy.disconnect().await.unwrap();
        assert!(!proxy.is_connected());
    }
}

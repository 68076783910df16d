//! Bus-backed device proxy
//!
//! Requests go out on `<prefix>/request/<device_type>/<device_number>/<method>`
//! and responses come back on `<prefix>/response/+`, matched by request id.
//! The device bridge speaks plain JSON on its own topic space rather than the
//! coordinator envelope.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::ascom::proxy::{DeviceParams, DeviceProxy, ProxyMetrics, ProxyMetricsSnapshot};
use crate::bus::{topic, BusClient};
use crate::error::{Error, Result};

/// Backend configuration carried in the device row's `backend_config`
#[derive(Debug, Clone, Deserialize)]
pub struct BusBackendConfig {
    /// Topic prefix of the device bridge
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "ascom".to_string()
}

/// Request published to the device bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusDeviceRequest {
    pub request_id: String,
    pub http_method: String,
    pub parameters: DeviceParams,
}

/// Response published by the device bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusDeviceResponse {
    pub request_id: String,

    #[serde(rename = "Value", default)]
    pub value: Value,

    #[serde(rename = "ErrorNumber", default)]
    pub error_number: i32,

    #[serde(rename = "ErrorMessage", default)]
    pub error_message: String,
}

/// Bus transport for one device
pub struct BusProxy {
    device_type: String,
    device_number: u32,
    prefix: String,
    bus: Arc<BusClient>,
    response_timeout: Duration,
    waiters: Arc<DashMap<String, oneshot::Sender<BusDeviceResponse>>>,
    subscribed: AtomicBool,
    metrics: ProxyMetrics,
}

impl BusProxy {
    pub fn new(
        device_type: &str,
        device_number: u32,
        config: BusBackendConfig,
        bus: Arc<BusClient>,
        response_timeout: Duration,
    ) -> Self {
        Self {
            device_type: device_type.to_string(),
            device_number,
            prefix: config.prefix,
            bus,
            response_timeout,
            waiters: Arc::new(DashMap::new()),
            subscribed: AtomicBool::new(false),
            metrics: ProxyMetrics::new(),
        }
    }

    fn response_pattern(&self) -> String {
        format!("{}/response/+", self.prefix)
    }

    async fn execute(&self, method: &str, params: &DeviceParams, http_method: &str) -> Result<Value> {
        let started = Instant::now();
        let outcome = self.execute_inner(method, params, http_method).await;

        match &outcome {
            Ok(_) => self.metrics.record_success(started.elapsed()),
            Err(e) => self.metrics.record_failure(e),
        }
        outcome
    }

    async fn execute_inner(
        &self,
        method: &str,
        params: &DeviceParams,
        http_method: &str,
    ) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let request = BusDeviceRequest {
            request_id: request_id.clone(),
            http_method: http_method.to_string(),
            parameters: params.clone(),
        };

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(request_id.clone(), tx);

        let request_topic =
            topic::ascom_request(&self.prefix, &self.device_type, self.device_number, method);
        let bytes = serde_json::to_vec(&request)
            .map_err(|e| Error::Internal(format!("failed to encode device request: {}", e)))?;

        if let Err(e) = self
            .bus
            .publish(&request_topic, QoS::AtLeastOnce, false, bytes)
            .await
        {
            self.waiters.remove(&request_id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(Error::Cancelled);
            }
            Err(_) => {
                self.waiters.remove(&request_id);
                return Err(Error::Timeout(format!(
                    "no device response for {} within {:?}",
                    request_id, self.response_timeout
                )));
            }
        };

        if response.error_number != 0 {
            return Err(Error::Device {
                code: response.error_number,
                message: response.error_message,
            });
        }

        Ok(response.value)
    }
}

#[async_trait]
impl DeviceProxy for BusProxy {
    fn name(&self) -> &str {
        "bus"
    }

    async fn connect(&self) -> Result<()> {
        if !self.subscribed.swap(true, Ordering::SeqCst) {
            let waiters = Arc::clone(&self.waiters);
            self.bus
                .subscribe(&self.response_pattern(), QoS::AtLeastOnce, move |msg| {
                    let waiters = Arc::clone(&waiters);
                    async move {
                        let response: BusDeviceResponse =
                            match serde_json::from_slice(&msg.payload) {
                                Ok(response) => response,
                                Err(e) => {
                                    tracing::warn!("Ignoring malformed device response: {}", e);
                                    return;
                                }
                            };
                        if let Some((_, tx)) = waiters.remove(&response.request_id) {
                            let _ = tx.send(response);
                        }
                    }
                })
                .await?;
        }
        self.metrics.set_connection_state("connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.subscribed.swap(false, Ordering::SeqCst) {
            self.bus.unsubscribe(&self.response_pattern()).await?;
        }
        self.waiters.clear();
        self.metrics.set_connection_state("disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst) && self.bus.is_connected()
    }

    async fn get(&self, method: &str, params: &DeviceParams) -> Result<Value> {
        self.execute(method, params, "GET").await
    }

    async fn put(&self, method: &str, params: &DeviceParams) -> Result<Value> {
        self.execute(method, params, "PUT").await
    }

    async fn health_check(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::BusNotConnected)
        }
    }

    fn metrics(&self) -> ProxyMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use serde_json::json;

    fn proxy() -> BusProxy {
        let bus = Arc::new(BusClient::new(BusConfig::default(), "ascom"));
        BusProxy::new(
            "telescope",
            0,
            BusBackendConfig {
                prefix: "ascom".to_string(),
            },
            bus,
            Duration::from_millis(200),
        )
    }

    #[test]
    fn test_response_pattern() {
        assert_eq!(proxy().response_pattern(), "ascom/response/+");
    }

    #[tokio::test]
    async fn test_request_with_dead_bus_fails_and_cleans_up() {
        let p = proxy();
        let err = p.get("altitude", &DeviceParams::new()).await.unwrap_err();
        assert!(matches!(err, Error::BusNotConnected));
        assert!(p.waiters.is_empty());
        assert_eq!(p.metrics().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_response_resolves_waiter() {
        let p = proxy();
        let (tx, rx) = oneshot::channel();
        p.waiters.insert("req-1".to_string(), tx);

        // What the subscription handler does on delivery
        let response = BusDeviceResponse {
            request_id: "req-1".to_string(),
            value: json!(12.5),
            error_number: 0,
            error_message: String::new(),
        };
        if let Some((_, waiter)) = p.waiters.remove(&response.request_id) {
            waiter.send(response).unwrap();
        }

        let got = rx.await.unwrap();
        assert_eq!(got.value, json!(12.5));
    }

    #[test]
    fn test_device_error_propagates_code() {
        let response = BusDeviceResponse {
            request_id: "req-2".to_string(),
            value: Value::Null,
            error_number: 0x407,
            error_message: "not connected".to_string(),
        };
        // The unwrap execute_inner applies to a non-zero code
        let err = if response.error_number != 0 {
            Error::Device {
                code: response.error_number,
                message: response.error_message,
            }
        } else {
            unreachable!()
        };
        assert!(matches!(err, Error::Device { code: 0x407, .. }));
    }

    #[test]
    fn test_wire_shape() {
        let request = BusDeviceRequest {
            request_id: "r".to_string(),
            http_method: "PUT".to_string(),
            parameters: DeviceParams::from([("Azimuth".to_string(), "180".to_string())]),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["http_method"], "PUT");
        assert_eq!(value["parameters"]["Azimuth"], "180");
    }
}

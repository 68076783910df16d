//! HTTP proxy to a remote ASCOM Alpaca server

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::ascom::alpaca::AlpacaResponse;
use crate::ascom::proxy::{DeviceParams, DeviceProxy, ProxyMetrics, ProxyMetricsSnapshot};
use crate::error::{Error, Result};

/// Backend configuration carried in the device row's `backend_config`
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkBackendConfig {
    /// Base URL of the remote Alpaca server, e.g. `http://10.0.0.20:11111`
    pub server_url: String,

    /// ClientID injected into every request
    #[serde(default)]
    pub client_id: Option<u32>,
}

/// HTTP transport for one remote device
pub struct NetworkProxy {
    device_type: String,
    device_number: u32,
    server_url: String,
    client_id: Option<u32>,
    client: reqwest::Client,
    connected: AtomicBool,
    metrics: ProxyMetrics,
}

impl NetworkProxy {
    pub fn new(
        device_type: &str,
        device_number: u32,
        config: NetworkBackendConfig,
        request_timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            device_type: device_type.to_string(),
            device_number,
            server_url: config.server_url.trim_end_matches('/').to_string(),
            client_id: config.client_id,
            client,
            connected: AtomicBool::new(false),
            metrics: ProxyMetrics::new(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/api/v1/{}/{}/{}",
            self.server_url, self.device_type, self.device_number, method
        )
    }

    fn with_client_id(&self, params: &DeviceParams) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(client_id) = self.client_id {
            if !params.contains_key("ClientID") {
                pairs.push(("ClientID".to_string(), client_id.to_string()));
            }
        }
        pairs
    }

    /// Unwrap a remote response: non-2xx and non-zero ErrorNumber are errors
    async fn parse_response(&self, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Bus(format!(
                "remote Alpaca server returned HTTP {}",
                status
            )));
        }

        let envelope: AlpacaResponse = response
            .json()
            .await
            .map_err(|e| Error::Validation(format!("malformed Alpaca envelope: {}", e)))?;

        if !envelope.is_ok() {
            return Err(Error::Device {
                code: envelope.error_number,
                message: envelope.error_message,
            });
        }

        Ok(envelope.value)
    }

    async fn execute(&self, method: &str, params: &DeviceParams, write: bool) -> Result<Value> {
        let started = Instant::now();
        let url = self.method_url(method);
        let pairs = self.with_client_id(params);

        let request = if write {
            self.client.put(&url).form(&pairs)
        } else {
            self.client.get(&url).query(&pairs)
        };

        let outcome = match request.send().await {
            Ok(response) => self.parse_response(response).await,
            Err(e) if e.is_timeout() => Err(Error::Timeout(format!("request to {} timed out", url))),
            Err(e) => Err(Error::Bus(format!("request to {} failed: {}", url, e))),
        };

        match &outcome {
            Ok(_) => self.metrics.record_success(started.elapsed()),
            Err(e) => self.metrics.record_failure(e),
        }
        outcome
    }
}

#[async_trait]
impl DeviceProxy for NetworkProxy {
    fn name(&self) -> &str {
        "network"
    }

    async fn connect(&self) -> Result<()> {
        // HTTP is connectionless; verify the server answers before reporting
        // the proxy usable
        self.health_check().await?;
        self.connected.store(true, Ordering::SeqCst);
        self.metrics.set_connection_state("connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.metrics.set_connection_state("disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get(&self, method: &str, params: &DeviceParams) -> Result<Value> {
        self.execute(method, params, false).await
    }

    async fn put(&self, method: &str, params: &DeviceParams) -> Result<Value> {
        self.execute(method, params, true).await
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/management/apiversions", self.server_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Bus(format!("health probe to {} failed: {}", url, e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Bus(format!(
                "health probe to {} returned HTTP {}",
                url,
                response.status()
            )))
        }
    }

    fn metrics(&self) -> ProxyMetricsSnapshot {
        self.metrics.snapshot()
    }
}

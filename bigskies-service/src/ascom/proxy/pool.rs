//! Connection pool over a device's backend proxies
//!
//! The pool owns selection (primary, round-robin, least-latency), the retry
//! loop with exponential backoff, and the per-proxy health state machine.
//! Proxies themselves are single-attempt transports.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::ascom::proxy::{DeviceParams, DeviceProxy, ProxyMetricsSnapshot};
use crate::config::ProxyConfig;
use crate::error::{Error, Result};

/// How the pool picks a proxy for each operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    /// Index 0 with one failover to the first healthy alternate
    Primary,
    /// Rotate past unhealthy entries
    RoundRobin,
    /// Healthy proxy with the lowest average latency
    LeastLatency,
}

impl FromStr for RoutingStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" => Ok(Self::Primary),
            "round_robin" => Ok(Self::RoundRobin),
            "least_latency" => Ok(Self::LeastLatency),
            other => Err(Error::Validation(format!(
                "unknown routing strategy '{}'",
                other
            ))),
        }
    }
}

/// Health state of one pooled proxy
#[derive(Debug, Clone)]
pub struct ProxyState {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for ProxyState {
    fn default() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_health_check_at: None,
            last_error: None,
        }
    }
}

struct PoolEntry {
    proxy: Arc<dyn DeviceProxy>,
    state: Mutex<ProxyState>,
}

impl PoolEntry {
    fn is_healthy(&self) -> bool {
        self.state.lock().expect("state lock poisoned").healthy
    }
}

/// Pool of backend proxies for one (device_type, device_number)
pub struct ProxyPool {
    device_type: String,
    device_number: u32,
    strategy: RoutingStrategy,
    entries: Vec<Arc<PoolEntry>>,
    next_index: AtomicUsize,
    config: ProxyConfig,
    cancel: CancellationToken,
}

impl ProxyPool {
    pub fn new(
        device_type: &str,
        device_number: u32,
        proxies: Vec<Arc<dyn DeviceProxy>>,
        config: ProxyConfig,
    ) -> Result<Self> {
        if proxies.is_empty() {
            return Err(Error::BackendUnavailable(format!(
                "no proxies configured for {}/{}",
                device_type, device_number
            )));
        }

        Ok(Self {
            device_type: device_type.to_string(),
            device_number,
            strategy: config.strategy.parse()?,
            entries: proxies
                .into_iter()
                .map(|proxy| {
                    Arc::new(PoolEntry {
                        proxy,
                        state: Mutex::new(ProxyState::default()),
                    })
                })
                .collect(),
            next_index: AtomicUsize::new(0),
            config,
            cancel: CancellationToken::new(),
        })
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    pub fn healthy_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_healthy()).count()
    }

    /// Connect every proxy and verify the minimum healthy floor
    ///
    /// Refuses to start below `min_healthy_backends`; afterwards, dropping
    /// below the floor is logged but does not terminate the pool.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        for entry in &self.entries {
            match entry.proxy.connect().await {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(
                        device = %self.label(),
                        proxy = entry.proxy.name(),
                        "initial connect failed: {}", e
                    );
                    let mut state = entry.state.lock().expect("state lock poisoned");
                    state.healthy = false;
                    state.last_error = Some(e.to_string());
                }
            }
        }

        let healthy = self.healthy_count();
        if healthy < self.config.min_healthy_backends {
            return Err(Error::BackendUnavailable(format!(
                "{}: only {} of {} backends healthy (minimum {})",
                self.label(),
                healthy,
                self.entries.len(),
                self.config.min_healthy_backends
            )));
        }

        let this = Arc::clone(self);
        tokio::spawn(async move { this.health_loop().await });

        tracing::info!(
            device = %self.label(),
            backends = self.entries.len(),
            healthy,
            strategy = ?self.strategy,
            "proxy pool started"
        );
        Ok(())
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        for entry in &self.entries {
            if let Err(e) = entry.proxy.disconnect().await {
                tracing::debug!(proxy = entry.proxy.name(), "disconnect failed: {}", e);
            }
        }
    }

    fn label(&self) -> String {
        format!("{}/{}", self.device_type, self.device_number)
    }

    /// Pick an entry index per the routing strategy
    fn select(&self) -> Result<usize> {
        let healthy: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_healthy())
            .map(|(i, _)| i)
            .collect();

        if healthy.is_empty() {
            return Err(Error::BackendUnavailable(format!(
                "{}: no healthy backend",
                self.label()
            )));
        }

        let index = match self.strategy {
            RoutingStrategy::Primary => {
                if healthy.contains(&0) {
                    0
                } else {
                    healthy[0]
                }
            }
            RoutingStrategy::RoundRobin => {
                let start = self.next_index.fetch_add(1, Ordering::Relaxed);
                healthy[start % healthy.len()]
            }
            RoutingStrategy::LeastLatency => *healthy
                .iter()
                .min_by(|a, b| {
                    let la = self.entries[**a]
                        .proxy
                        .metrics()
                        .average_latency_ms
                        .unwrap_or(f64::INFINITY);
                    let lb = self.entries[**b]
                        .proxy
                        .metrics()
                        .average_latency_ms
                        .unwrap_or(f64::INFINITY);
                    la.partial_cmp(&lb).unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("healthy set is non-empty"),
        };

        Ok(index)
    }

    /// Read a device property through the pool
    pub async fn get(&self, method: &str, params: &DeviceParams) -> Result<Value> {
        self.execute(method, params, false).await
    }

    /// Invoke a device method through the pool
    pub async fn put(&self, method: &str, params: &DeviceParams) -> Result<Value> {
        self.execute(method, params, true).await
    }

    async fn execute(&self, method: &str, params: &DeviceParams, write: bool) -> Result<Value> {
        let index = self.select()?;

        match self.execute_on(index, method, params, write).await {
            Ok(value) => Ok(value),
            Err(first_error) => {
                // Primary strategy gets exactly one failover to the first
                // healthy alternate
                if self.strategy == RoutingStrategy::Primary && index == 0 {
                    if let Some(alternate) = self
                        .entries
                        .iter()
                        .enumerate()
                        .skip(1)
                        .find(|(_, e)| e.is_healthy())
                        .map(|(i, _)| i)
                    {
                        tracing::warn!(
                            device = %self.label(),
                            "primary failed, failing over to backend {}", alternate
                        );
                        return self.execute_on(alternate, method, params, write).await;
                    }
                }
                Err(first_error)
            }
        }
    }

    /// Run one operation on one entry with the retry loop
    ///
    /// Every attempt updates the entry's health counters, so a burst of
    /// retries can cross the failure threshold on its own.
    async fn execute_on(
        &self,
        index: usize,
        method: &str,
        params: &DeviceParams,
        write: bool,
    ) -> Result<Value> {
        let entry = &self.entries[index];
        let mut delay = self.config.retry_delay();
        let mut last_error = None;

        for attempt in 0..=self.config.retry_attempts {
            if attempt > 0 {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                delay *= 2;
            }

            let result = if write {
                entry.proxy.put(method, params).await
            } else {
                entry.proxy.get(method, params).await
            };

            match result {
                Ok(value) => {
                    self.record_success(entry);
                    return Ok(value);
                }
                Err(e) => {
                    tracing::debug!(
                        device = %self.label(),
                        proxy = entry.proxy.name(),
                        attempt,
                        "device call failed: {}", e
                    );
                    self.record_failure(entry, &e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Internal("retry loop without attempts".to_string())))
    }

    fn record_success(&self, entry: &PoolEntry) {
        let mut state = entry.state.lock().expect("state lock poisoned");
        state.consecutive_failures = 0;
        state.consecutive_successes += 1;
        if !state.healthy && state.consecutive_successes >= self.config.recovery_threshold {
            state.healthy = true;
            tracing::info!(
                device = %self.label(),
                proxy = entry.proxy.name(),
                "backend recovered"
            );
        }
    }

    fn record_failure(&self, entry: &PoolEntry, error: &Error) {
        let mut state = entry.state.lock().expect("state lock poisoned");
        state.consecutive_successes = 0;
        state.consecutive_failures += 1;
        state.last_error = Some(error.to_string());
        if state.healthy && state.consecutive_failures >= self.config.failure_threshold {
            state.healthy = false;
            tracing::warn!(
                device = %self.label(),
                proxy = entry.proxy.name(),
                failures = state.consecutive_failures,
                "backend marked unhealthy"
            );
        }
    }

    /// Periodic health probe driving the same state machine as operations
    async fn health_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.health_check_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {}
            }

            for entry in &self.entries {
                let result = entry.proxy.health_check().await;
                {
                    let mut state = entry.state.lock().expect("state lock poisoned");
                    state.last_health_check_at = Some(Utc::now());
                }
                match result {
                    Ok(()) => self.record_success(entry),
                    Err(e) => self.record_failure(entry, &e),
                }
            }

            let healthy = self.healthy_count();
            if healthy < self.config.min_healthy_backends {
                tracing::warn!(
                    device = %self.label(),
                    healthy,
                    minimum = self.config.min_healthy_backends,
                    "pool below healthy floor"
                );
            }
        }
    }

    /// Per-proxy state and metrics, for observability endpoints
    pub fn states(&self) -> Vec<(String, ProxyState, ProxyMetricsSnapshot)> {
        self.entries
            .iter()
            .map(|entry| {
                (
                    entry.proxy.name().to_string(),
                    entry.state.lock().expect("state lock poisoned").clone(),
                    entry.proxy.metrics(),
                )
            })
            .collect()
    }
}

//! Health engine: named checkers aggregated into one coordinator status

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Aggregated or per-check health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Result returned by a checker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unknown,
            message: Some(message.into()),
        }
    }
}

/// One check's outcome with its measured duration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub duration_ms: u64,
}

/// Aggregated report across all registered checkers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: HashMap<String, CheckOutcome>,
    pub checked_at: DateTime<Utc>,
}

/// A named health check
///
/// Checkers must be side-effect-free and bounded in time; the engine applies
/// its own timeout and reports an overrunning check as `Unknown`.
#[async_trait]
pub trait Checker: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> CheckResult;
}

/// Registry of checkers with concurrent evaluation and aggregation
pub struct HealthEngine {
    checkers: RwLock<Vec<Arc<dyn Checker>>>,
    check_timeout: Duration,
}

impl HealthEngine {
    pub fn new(check_timeout: Duration) -> Self {
        Self {
            checkers: RwLock::new(Vec::new()),
            check_timeout,
        }
    }

    /// Register a checker; later registrations with the same name shadow
    /// nothing, both results appear keyed by name (last write wins in the map)
    pub async fn register(&self, checker: Arc<dyn Checker>) {
        self.checkers.write().await.push(checker);
    }

    /// Run every registered check concurrently and aggregate
    ///
    /// Aggregation: any unhealthy makes the whole coordinator unhealthy, any
    /// degraded or unknown makes it degraded, otherwise healthy. An empty
    /// registry reports unknown.
    pub async fn check_all(&self) -> HealthReport {
        let checkers: Vec<Arc<dyn Checker>> = self.checkers.read().await.clone();

        if checkers.is_empty() {
            return HealthReport {
                status: HealthStatus::Unknown,
                checks: HashMap::new(),
                checked_at: Utc::now(),
            };
        }

        let timeout = self.check_timeout;
        let futures = checkers.iter().map(|checker| {
            let checker = Arc::clone(checker);
            async move {
                let started = std::time::Instant::now();
                let result = match tokio::time::timeout(timeout, checker.check()).await {
                    Ok(result) => result,
                    Err(_) => CheckResult::unknown(format!(
                        "check '{}' exceeded {:?}",
                        checker.name(),
                        timeout
                    )),
                };
                let outcome = CheckOutcome {
                    status: result.status,
                    message: result.message,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                (checker.name().to_string(), outcome)
            }
        });

        let checks: HashMap<String, CheckOutcome> =
            futures::future::join_all(futures).await.into_iter().collect();

        let status = aggregate(checks.values().map(|c| c.status));

        HealthReport {
            status,
            checks,
            checked_at: Utc::now(),
        }
    }
}

/// Bus connectivity checker shared by every coordinator
pub struct BusChecker {
    bus: Arc<crate::bus::BusClient>,
}

impl BusChecker {
    pub fn new(bus: Arc<crate::bus::BusClient>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Checker for BusChecker {
    fn name(&self) -> &str {
        "bus"
    }

    async fn check(&self) -> CheckResult {
        if self.bus.is_connected() {
            CheckResult::healthy()
        } else {
            CheckResult::unhealthy("broker session down")
        }
    }
}

/// Datastore connectivity checker for coordinators holding a pool
pub struct DatabaseChecker {
    pool: sqlx::PgPool,
}

impl DatabaseChecker {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Checker for DatabaseChecker {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self) -> CheckResult {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => CheckResult::healthy(),
            Err(e) => CheckResult::unhealthy(format!("query failed: {}", e)),
        }
    }
}

/// Fold per-check statuses into the coordinator status
fn aggregate(statuses: impl Iterator<Item = HealthStatus>) -> HealthStatus {
    let mut saw_any = false;
    let mut saw_degraded = false;

    for status in statuses {
        saw_any = true;
        match status {
            HealthStatus::Unhealthy => return HealthStatus::Unhealthy,
            HealthStatus::Degraded | HealthStatus::Unknown => saw_degraded = true,
            HealthStatus::Healthy => {}
        }
    }

    if !saw_any {
        HealthStatus::Unknown
    } else if saw_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

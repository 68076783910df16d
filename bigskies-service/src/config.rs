//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: BIGSKIES_)
//! 2. Current working directory: ./config.toml
//! 3. System directory: /etc/bigskies/{service_name}/config.toml
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Message bus configuration
    #[serde(default)]
    pub bus: BusConfig,

    /// Health engine configuration
    #[serde(default)]
    pub health: HealthConfig,

    /// Credentials bootstrap configuration
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Database configuration (optional; usually filled by the bootstrap handshake)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// RBAC interception configuration (message coordinator)
    #[serde(default)]
    pub rbac: RbacConfig,

    /// Service registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// ASCOM facade configuration (ASCOM gateway)
    #[serde(default)]
    pub ascom: AscomConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            bus: BusConfig::default(),
            health: HealthConfig::default(),
            credentials: CredentialsConfig::default(),
            database: None,
            rbac: RbacConfig::default(),
            registry: RegistryConfig::default(),
            ascom: AscomConfig::default(),
        }
    }
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Coordinator name (message, security, datastore, application, plugin,
    /// telescope, uielement, ascom)
    pub name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "coordinator".to_string(),
            log_level: default_log_level(),
            environment: default_environment(),
        }
    }
}

/// Message bus (MQTT broker) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Broker host
    #[serde(default = "default_broker_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Client identifier; defaults to the coordinator name when empty
    #[serde(default)]
    pub client_id: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Initial reconnect delay in seconds
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Upper bound on the reconnect backoff interval in seconds
    #[serde(default = "default_max_reconnect_interval_secs")]
    pub max_reconnect_interval_secs: u64,

    /// Maximum retry attempts for the initial connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Bound on in-flight outgoing messages held by the client
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            client_id: None,
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_reconnect_interval_secs: default_max_reconnect_interval_secs(),
            max_retries: default_max_retries(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl BusConfig {
    /// Connect timeout as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Keep-alive interval as a Duration
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Health engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Whether the coordinator publishes its aggregated health on the bus
    #[serde(default = "default_true")]
    pub publish_enabled: bool,

    /// Cadence of health publication in seconds
    #[serde(default = "default_health_interval_secs")]
    pub publish_interval_secs: u64,

    /// Delay before the first publication, allowing subscribers to attach
    #[serde(default = "default_health_initial_delay_secs")]
    pub initial_delay_secs: u64,

    /// Per-check timeout; a check exceeding it reports Unknown
    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            publish_enabled: true,
            publish_interval_secs: default_health_interval_secs(),
            initial_delay_secs: default_health_initial_delay_secs(),
            check_timeout_secs: default_check_timeout_secs(),
        }
    }
}

impl HealthConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

/// Credentials bootstrap handshake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Publish a request on the bootstrap request topic at startup
    #[serde(default = "default_true")]
    pub request_on_start: bool,

    /// How long to wait for the credentials message before failing
    #[serde(default = "default_credentials_timeout_secs")]
    pub wait_timeout_secs: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            request_on_start: true,
            wait_timeout_secs: default_credentials_timeout_secs(),
        }
    }
}

impl CredentialsConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connection_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

/// RBAC interception configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacConfig {
    /// Master switch; when false every intercepted message is forwarded untouched
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on pending validations
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Per-request wait for the security coordinator's verdict, in seconds
    #[serde(default = "default_validation_timeout_secs")]
    pub validation_timeout_secs: u64,

    /// Sweeper cadence in seconds
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Cadence of metrics snapshot publication in seconds (0 disables)
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,

    /// Ordered protection rules; first pattern match wins
    #[serde(default)]
    pub rules: Vec<ProtectionRuleConfig>,
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_queue_size: default_max_queue_size(),
            validation_timeout_secs: default_validation_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            metrics_interval_secs: default_metrics_interval_secs(),
            rules: Vec::new(),
        }
    }
}

impl RbacConfig {
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// One protection rule as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionRuleConfig {
    /// Topic pattern; `+` matches one segment, `#` matches the trailing remainder
    pub pattern: String,

    /// Resource name sent to the security coordinator
    pub resource: String,

    /// Action name sent to the security coordinator
    pub action: String,
}

/// Service registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// A registered service with no heartbeat for this long is unhealthy
    #[serde(default = "default_service_timeout_secs")]
    pub service_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            service_timeout_secs: default_service_timeout_secs(),
        }
    }
}

impl RegistryConfig {
    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs)
    }
}

/// ASCOM Alpaca facade configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AscomConfig {
    /// HTTP API port
    #[serde(default = "default_ascom_port")]
    pub port: u16,

    /// UDP discovery port
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    /// Enable the UDP discovery responder
    #[serde(default = "default_true")]
    pub discovery_enabled: bool,

    /// Enable permissive CORS for browser-hosted clients
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,

    /// Server description served on the management API
    #[serde(default)]
    pub description: AscomDescriptionConfig,

    /// Authentication middleware configuration
    #[serde(default)]
    pub auth: AscomAuthConfig,

    /// Session tracking configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Backend proxy defaults, overridable per device via backend_config
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl Default for AscomConfig {
    fn default() -> Self {
        Self {
            port: default_ascom_port(),
            discovery_port: default_discovery_port(),
            discovery_enabled: true,
            cors_enabled: true,
            timeout_secs: default_request_timeout_secs(),
            description: AscomDescriptionConfig::default(),
            auth: AscomAuthConfig::default(),
            session: SessionConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

/// Management API description payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AscomDescriptionConfig {
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,

    #[serde(default = "default_manufacturer_version")]
    pub manufacturer_version: String,

    #[serde(default = "default_location")]
    pub location: String,
}

impl Default for AscomDescriptionConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            manufacturer: default_manufacturer(),
            manufacturer_version: default_manufacturer_version(),
            location: default_location(),
        }
    }
}

/// ASCOM authentication middleware configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AscomAuthConfig {
    /// Require a bearer token on every request
    #[serde(default = "default_true")]
    pub require_auth: bool,

    /// Allow unauthenticated GET requests when require_auth is set
    #[serde(default = "default_false")]
    pub allow_anonymous_read: bool,

    /// Bound on the bus round-trip to the security coordinator, in seconds
    #[serde(default = "default_token_validation_timeout_secs")]
    pub token_validation_timeout_secs: u64,
}

impl Default for AscomAuthConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            allow_anonymous_read: false,
            token_validation_timeout_secs: default_token_validation_timeout_secs(),
        }
    }
}

impl AscomAuthConfig {
    pub fn token_validation_timeout(&self) -> Duration {
        Duration::from_secs(self.token_validation_timeout_secs)
    }
}

/// ASCOM session tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity threshold before a session goes idle, in seconds.
    /// Twice this threshold closes the session.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// Sweeper cadence in seconds
    #[serde(default = "default_session_cleanup_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout_secs(),
            cleanup_interval_secs: default_session_cleanup_secs(),
        }
    }
}

impl SessionConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Backend proxy and pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Additional attempts after the first failure
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base backoff delay in milliseconds, doubled per attempt
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Bus proxy response wait in seconds
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,

    /// Network proxy per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Pool health check cadence in seconds
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Consecutive failures before a proxy is marked unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive successes before an unhealthy proxy recovers
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,

    /// Minimum healthy proxies required for the pool to start
    #[serde(default = "default_min_healthy_backends")]
    pub min_healthy_backends: usize,

    /// Routing strategy: primary, round_robin, least_latency
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            response_timeout_secs: default_response_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            failure_threshold: default_failure_threshold(),
            recovery_threshold: default_recovery_threshold(),
            min_healthy_backends: default_min_healthy_backends(),
            strategy: default_strategy(),
        }
    }
}

impl ProxyConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_broker_host() -> String {
    "mqtt-broker".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_reconnect_delay_secs() -> u64 {
    2
}

fn default_max_reconnect_interval_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    5
}

fn default_channel_capacity() -> usize {
    256
}

fn default_health_interval_secs() -> u64 {
    30
}

fn default_health_initial_delay_secs() -> u64 {
    5
}

fn default_check_timeout_secs() -> u64 {
    5
}

fn default_credentials_timeout_secs() -> u64 {
    60
}

fn default_max_connections() -> u32 {
    20
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_validation_timeout_secs() -> u64 {
    30
}

fn default_cleanup_interval_secs() -> u64 {
    10
}

fn default_metrics_interval_secs() -> u64 {
    60
}

fn default_service_timeout_secs() -> u64 {
    90
}

fn default_ascom_port() -> u16 {
    11111
}

fn default_discovery_port() -> u16 {
    32227
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_server_name() -> String {
    "BigSkies ASCOM Gateway".to_string()
}

fn default_manufacturer() -> String {
    "BigSkies".to_string()
}

fn default_manufacturer_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_location() -> String {
    "Unknown".to_string()
}

fn default_token_validation_timeout_secs() -> u64 {
    5
}

fn default_session_timeout_secs() -> u64 {
    1800
}

fn default_session_cleanup_secs() -> u64 {
    300
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_response_timeout_secs() -> u64 {
    10
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_threshold() -> u32 {
    2
}

fn default_min_healthy_backends() -> usize {
    1
}

fn default_strategy() -> String {
    "primary".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Searches for config files in this order (first found is used):
    /// 1. Current working directory: ./config.toml
    /// 2. System directory: /etc/bigskies/{service_name}/config.toml
    ///
    /// Environment variables (BIGSKIES_ prefix) override all file-based configs.
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Merge config files in reverse order (lowest priority first)
        // so that higher priority files override lower ones
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        // Environment variables have highest priority
        figment = figment.merge(Env::prefixed("BIGSKIES_").split("_"));

        let config = figment.extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// Bypasses the search path and loads directly from the given path.
    /// Useful for testing or non-standard deployments.
    pub fn load_from(path: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("BIGSKIES_").split("_"))
            .extract()?;

        Ok(config)
    }

    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        vec![
            PathBuf::from("config.toml"),
            PathBuf::from(format!("/etc/bigskies/{}/config.toml", service_name)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bus.host, "mqtt-broker");
        assert_eq!(config.bus.port, 1883);
        assert_eq!(config.bus.keep_alive_secs, 30);
        assert_eq!(config.rbac.max_queue_size, 1000);
        assert_eq!(config.rbac.validation_timeout_secs, 30);
        assert_eq!(config.rbac.cleanup_interval_secs, 10);
        assert_eq!(config.ascom.port, 11111);
        assert_eq!(config.ascom.discovery_port, 32227);
        assert_eq!(config.ascom.auth.token_validation_timeout_secs, 5);
    }

    #[test]
    fn test_auth_defaults_fail_closed() {
        let auth = AscomAuthConfig::default();
        assert!(auth.require_auth);
        assert!(!auth.allow_anonymous_read);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[service]
name = "message"

[rbac]
max_queue_size = 64

[[rbac.rules]]
pattern = "bigskies/coordinator/telescope/control/+"
resource = "telescope"
action = "control"
"#
        )
        .unwrap();

        let config = Config::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.service.name, "message");
        assert_eq!(config.rbac.max_queue_size, 64);
        assert_eq!(config.rbac.rules.len(), 1);
        assert_eq!(config.rbac.rules[0].resource, "telescope");
    }

    #[test]
    fn test_proxy_defaults() {
        let proxy = ProxyConfig::default();
        assert_eq!(proxy.failure_threshold, 3);
        assert_eq!(proxy.recovery_threshold, 2);
        assert_eq!(proxy.strategy, "primary");
    }
}

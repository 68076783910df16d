//! # bigskies-service
//!
//! Shared runtime for the BigSkies coordinator fleet: long-lived services
//! that cooperate over an MQTT bus and expose astronomy equipment to ASCOM
//! Alpaca clients.
//!
//! ## What lives here
//!
//! - **Bus fabric**: MQTT client with reconnect and re-subscription, the
//!   topic grammar and wildcard matcher, and the fixed message envelope
//! - **Coordinator runtime**: lifecycle with a LIFO shutdown stack, bus
//!   health publication, the credentials bootstrap handshake, and a
//!   correlated request/response utility
//! - **RBAC interception**: the message coordinator's transparent pipeline
//!   gating protected topics through the security coordinator
//! - **ASCOM facade**: Alpaca HTTP surface with bus-backed authentication,
//!   telescope permissions, client session tracking, and a backend proxy
//!   pool with failover
//!
//! ## Example
//!
//! ```rust,no_run
//! use bigskies_service::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load_for_service("message")?;
//!     init_tracing(&config)?;
//!
//!     let coordinator = Arc::new(Coordinator::new(config.clone()));
//!     coordinator.start().await?;
//!
//!     let interceptor = Arc::new(RbacInterceptor::new(
//!         Arc::clone(coordinator.bus()),
//!         coordinator.name(),
//!         config.rbac.clone(),
//!     )?);
//!     interceptor.start().await?;
//!
//!     bigskies_service::server::shutdown_signal().await;
//!     interceptor.stop();
//!     coordinator.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod ascom;
pub mod audit;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod health;
pub mod messages;
pub mod observability;
pub mod rbac;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ascom::{
        AlpacaResponse, AscomAuth, AscomDevice, AscomGateway, AuthenticatedUser, BackendMode,
        DeviceProxy, DeviceRegistry, ProxyPool, RoutingStrategy, SessionManager, SessionStatus,
        TelescopeAuthorizer,
    };
    pub use crate::audit::{AuditLog, AuditOutcome, AuditRecord};
    pub use crate::bus::{BusClient, Envelope, MessageType, QoS, TopicFilter};
    pub use crate::config::Config;
    pub use crate::coordinator::{Coordinator, CredentialsHandshake, ResponseCorrelator, ServiceRegistry};
    pub use crate::error::{Error, Result};
    pub use crate::health::{CheckResult, Checker, HealthEngine, HealthStatus};
    pub use crate::messages::{CredentialsBundle, UserContext};
    pub use crate::observability::init_tracing;
    pub use crate::rbac::{RbacInterceptor, RbacMetricsSnapshot};
    pub use crate::server::Server;
}

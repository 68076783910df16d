//! Coordinator runtime: lifecycle, credentials bootstrap, correlation, registry

pub mod base;
pub mod correlator;
pub mod credentials;
pub mod registry;

pub use base::{Coordinator, ShutdownFunc};
pub use correlator::ResponseCorrelator;
pub use credentials::CredentialsHandshake;
pub use registry::ServiceRegistry;

//! Tracing initialization

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Initialize JSON tracing for a coordinator process
///
/// The audit channel (`target = "audit"`) shares the subscriber; deployments
/// that need a separate audit sink can split it with an EnvFilter directive
/// such as `audit=info`.
pub fn init_tracing(config: &Config) -> Result<()> {
    let log_level = config.service.log_level.clone();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Tracing initialized for service: {}", config.service.name);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_does_not_panic() {
        let config = Config::default();
        // A second init in the same process returns an error from the
        // global subscriber; both outcomes are fine here.
        let _ = init_tracing(&config);
    }
}

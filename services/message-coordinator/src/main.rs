//! Message coordinator service
//!
//! Owns the coordinator-wide wildcard subscription and gates protected
//! topics through the security coordinator's RBAC verdicts.

use std::sync::Arc;

use anyhow::Context;
use bigskies_service::coordinator::ShutdownFunc;
use bigskies_service::prelude::*;
use bigskies_service::server::shutdown_signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::load_for_service("message").context("loading configuration")?;
    config.service.name = "message".to_string();

    init_tracing(&config).context("initializing tracing")?;

    let coordinator = Arc::new(Coordinator::new(config.clone()));
    coordinator.start().await.context("starting coordinator")?;

    // Heartbeat tracking for registered services feeds the health engine
    let registry = Arc::new(ServiceRegistry::new(config.registry.service_timeout()));
    registry
        .attach(coordinator.bus())
        .await
        .context("attaching service registry")?;
    coordinator.health().register(Arc::clone(&registry) as _).await;

    let interceptor = Arc::new(
        RbacInterceptor::new(
            Arc::clone(coordinator.bus()),
            coordinator.name(),
            config.rbac.clone(),
        )
        .context("compiling protection rules")?,
    );
    interceptor.start().await.context("starting interceptor")?;

    {
        let interceptor = Arc::clone(&interceptor);
        let func: ShutdownFunc = Box::new(move || {
            Box::pin(async move {
                interceptor.stop();
                Ok(())
            })
        });
        coordinator.push_shutdown(func).await;
    }

    tracing::info!("message coordinator running");
    shutdown_signal().await;

    coordinator.stop().await.context("stopping coordinator")?;
    Ok(())
}

//! ASCOM gateway service
//!
//! Speaks Alpaca HTTP to imaging software and bridges every device call onto
//! the fleet: tokens validate through the security coordinator, telescope
//! permissions come from the datastore, and device traffic flows through the
//! backend proxy pools.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use bigskies_service::ascom::auth::attach_response_listener;
use bigskies_service::ascom::proxy::bus::BusBackendConfig;
use bigskies_service::ascom::proxy::network::NetworkBackendConfig;
use bigskies_service::ascom::{discovery, router, BusProxy, NetworkProxy};
use bigskies_service::health::{BusChecker, DatabaseChecker};
use bigskies_service::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::load_for_service("ascom").context("loading configuration")?;
    config.service.name = "ascom".to_string();

    init_tracing(&config).context("initializing tracing")?;

    let coordinator = Arc::new(Coordinator::new(config.clone()));
    coordinator.start().await.context("starting coordinator")?;
    coordinator
        .health()
        .register(Arc::new(BusChecker::new(Arc::clone(coordinator.bus()))))
        .await;

    // The datastore is off limits until the bootstrap publisher hands over
    // credentials; an explicit database URL in config short-circuits that.
    let database_url = match &config.database {
        Some(database) => database.url.clone(),
        None => {
            let handshake = coordinator.credentials();
            handshake.begin().await.context("starting credentials handshake")?;
            handshake
                .wait()
                .await
                .context("waiting for datastore credentials")?
                .connection_url()
        }
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(
            config
                .database
                .as_ref()
                .map(|d| d.max_connections)
                .unwrap_or(20),
        )
        .connect(&database_url)
        .await
        .context("connecting to the datastore")?;
    coordinator
        .health()
        .register(Arc::new(DatabaseChecker::new(pool.clone())))
        .await;

    let registry = Arc::new(DeviceRegistry::new(pool.clone()));
    registry.refresh().await.context("loading device registry")?;

    let pools = build_pools(&registry, &coordinator, &config).await;

    let sessions = SessionManager::new(pool.clone(), config.ascom.session.clone());

    attach_response_listener(coordinator.bus(), Arc::clone(coordinator.correlator()))
        .await
        .context("subscribing to auth responses")?;
    let auth = AscomAuth::new(
        config.ascom.auth.clone(),
        Arc::clone(coordinator.correlator()),
    );
    let authorizer = Arc::new(TelescopeAuthorizer::new(pool.clone(), Arc::clone(&registry)));

    let gateway = Arc::new(AscomGateway::new(
        config.ascom.description.clone(),
        Arc::clone(&registry),
        pools,
        Arc::clone(&sessions),
    ));

    // Authentication runs outermost, then telescope authorization, then the
    // Alpaca routes
    let app = router(Arc::clone(&gateway))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&authorizer),
            TelescopeAuthorizer::middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            auth.clone(),
            AscomAuth::middleware,
        ));

    if config.ascom.discovery_enabled {
        let cancel = coordinator.cancellation();
        let discovery_port = config.ascom.discovery_port;
        let api_port = config.ascom.port;
        tokio::spawn(async move {
            if let Err(e) = discovery::run_discovery(discovery_port, api_port, cancel).await {
                tracing::error!("discovery responder failed: {}", e);
            }
        });
    }

    tracing::info!("ascom gateway running");
    Server::new(config.ascom.clone()).serve(app).await?;

    sessions.stop();
    coordinator.stop().await.context("stopping coordinator")?;
    Ok(())
}

/// Build one proxy pool per registered device
///
/// A device whose pool cannot satisfy the healthy floor is skipped with an
/// error log; the rest of the gateway still serves.
async fn build_pools(
    registry: &Arc<DeviceRegistry>,
    coordinator: &Arc<Coordinator>,
    config: &Config,
) -> HashMap<(String, u32), Arc<ProxyPool>> {
    let mut pools = HashMap::new();

    for device in registry.all().await {
        let proxy: Arc<dyn DeviceProxy> = match device.backend_mode {
            BackendMode::Network => {
                let backend: NetworkBackendConfig =
                    match serde_json::from_value(device.backend_config.clone()) {
                        Ok(backend) => backend,
                        Err(e) => {
                            tracing::error!(
                                device = %device.unique_id,
                                "invalid network backend config: {}", e
                            );
                            continue;
                        }
                    };
                match NetworkProxy::new(
                    &device.device_type,
                    device.device_number,
                    backend,
                    config.ascom.proxy.request_timeout(),
                ) {
                    Ok(proxy) => Arc::new(proxy),
                    Err(e) => {
                        tracing::error!(device = %device.unique_id, "proxy build failed: {}", e);
                        continue;
                    }
                }
            }
            BackendMode::Bus => {
                let backend: BusBackendConfig =
                    serde_json::from_value(device.backend_config.clone()).unwrap_or(
                        BusBackendConfig {
                            prefix: "ascom".to_string(),
                        },
                    );
                Arc::new(BusProxy::new(
                    &device.device_type,
                    device.device_number,
                    backend,
                    Arc::clone(coordinator.bus()),
                    config.ascom.proxy.response_timeout(),
                ))
            }
            BackendMode::Direct => {
                tracing::warn!(
                    device = %device.unique_id,
                    "no hardware transport registered; skipping direct device"
                );
                continue;
            }
        };

        let pool = match ProxyPool::new(
            &device.device_type,
            device.device_number,
            vec![proxy],
            config.ascom.proxy.clone(),
        ) {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                tracing::error!(device = %device.unique_id, "pool build failed: {}", e);
                continue;
            }
        };

        if let Err(e) = pool.start().await {
            tracing::error!(device = %device.unique_id, "pool refused to start: {}", e);
            continue;
        }

        pools.insert(
            (device.device_type.clone(), device.device_number),
            pool,
        );
    }

    tracing::info!("built {} device pools", pools.len());
    pools
}

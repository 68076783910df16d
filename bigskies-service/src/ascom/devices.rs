//! ASCOM device descriptors and the in-memory registry
//!
//! Devices live in the `ascom_devices` table; the registry caches enabled
//! rows keyed by (device_type, device_number) and refreshes on demand.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Which transport serves a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// HTTP to a remote ASCOM Alpaca server
    Network,
    /// Request/response over the message bus
    Bus,
    /// Local hardware transport
    Direct,
}

impl FromStr for BackendMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "network" => Ok(Self::Network),
            "bus" => Ok(Self::Bus),
            "direct" => Ok(Self::Direct),
            other => Err(Error::Validation(format!("unknown backend mode '{}'", other))),
        }
    }
}

/// One configured ASCOM device
#[derive(Debug, Clone)]
pub struct AscomDevice {
    pub id: Uuid,
    pub device_type: String,
    pub device_number: u32,
    pub name: String,
    pub description: Option<String>,
    pub unique_id: String,
    pub backend_mode: BackendMode,
    pub backend_config: Value,
    pub organization_id: Option<Uuid>,
    pub enabled: bool,
    pub telescope_config_id: Option<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct DeviceRow {
    id: Uuid,
    device_type: String,
    device_number: i32,
    name: String,
    description: Option<String>,
    unique_id: String,
    backend_mode: String,
    backend_config: Value,
    organization_id: Option<Uuid>,
    enabled: bool,
    telescope_config_id: Option<Uuid>,
}

impl TryFrom<DeviceRow> for AscomDevice {
    type Error = Error;

    fn try_from(row: DeviceRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            device_type: row.device_type,
            device_number: u32::try_from(row.device_number)
                .map_err(|_| Error::Validation("negative device number".to_string()))?,
            name: row.name,
            description: row.description,
            unique_id: row.unique_id,
            backend_mode: row.backend_mode.parse()?,
            backend_config: row.backend_config,
            organization_id: row.organization_id,
            enabled: row.enabled,
            telescope_config_id: row.telescope_config_id,
        })
    }
}

/// Cache of enabled devices keyed by (device_type, device_number)
pub struct DeviceRegistry {
    pool: PgPool,
    devices: RwLock<HashMap<(String, u32), Arc<AscomDevice>>>,
}

impl DeviceRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Load (or reload) every enabled device from the database
    pub async fn refresh(&self) -> Result<usize> {
        let rows: Vec<DeviceRow> = sqlx::query_as(
            r#"
            SELECT id, device_type, device_number, name, description, unique_id,
                   backend_mode, backend_config, organization_id, enabled,
                   telescope_config_id
            FROM ascom_devices
            WHERE enabled = TRUE
            ORDER BY device_type, device_number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let device = AscomDevice::try_from(row)?;
            map.insert(
                (device.device_type.clone(), device.device_number),
                Arc::new(device),
            );
        }

        let count = map.len();
        *self.devices.write().await = map;
        tracing::info!("Device registry loaded {} enabled devices", count);
        Ok(count)
    }

    /// Look up one device by its Alpaca address
    pub async fn lookup(&self, device_type: &str, device_number: u32) -> Option<Arc<AscomDevice>> {
        self.devices
            .read()
            .await
            .get(&(device_type.to_string(), device_number))
            .cloned()
    }

    /// All cached devices, for the management API
    pub async fn all(&self) -> Vec<Arc<AscomDevice>> {
        let mut devices: Vec<Arc<AscomDevice>> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| {
            (a.device_type.as_str(), a.device_number).cmp(&(b.device_type.as_str(), b.device_number))
        });
        devices
    }

    /// Insert a device straight into the cache; test and bootstrap helper
    pub async fn insert(&self, device: AscomDevice) {
        self.devices.write().await.insert(
            (device.device_type.clone(), device.device_number),
            Arc::new(device),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn device(device_type: &str, number: u32) -> AscomDevice {
        AscomDevice {
            id: Uuid::new_v4(),
            device_type: device_type.to_string(),
            device_number: number,
            name: format!("{} {}", device_type, number),
            description: None,
            unique_id: format!("bs-{}-{}", device_type, number),
            backend_mode: BackendMode::Network,
            backend_config: json!({"server_url": "http://remote:11111"}),
            organization_id: None,
            enabled: true,
            telescope_config_id: None,
        }
    }

    fn lazy_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://bigskies@localhost/bigskies")
            .unwrap()
    }

    #[test]
    fn test_backend_mode_parse() {
        assert_eq!("network".parse::<BackendMode>().unwrap(), BackendMode::Network);
        assert_eq!("bus".parse::<BackendMode>().unwrap(), BackendMode::Bus);
        assert_eq!("direct".parse::<BackendMode>().unwrap(), BackendMode::Direct);
        assert!("serial".parse::<BackendMode>().is_err());
    }

    #[tokio::test]
    async fn test_lookup_and_all() {
        let registry = DeviceRegistry::new(lazy_pool());
        registry.insert(device("telescope", 0)).await;
        registry.insert(device("camera", 0)).await;

        let found = registry.lookup("telescope", 0).await.unwrap();
        assert_eq!(found.unique_id, "bs-telescope-0");
        assert!(registry.lookup("telescope", 1).await.is_none());

        let all = registry.all().await;
        assert_eq!(all.len(), 2);
        // Sorted by type then number
        assert_eq!(all[0].device_type, "camera");
    }

    #[test]
    fn test_negative_device_number_rejected() {
        let row = DeviceRow {
            id: Uuid::new_v4(),
            device_type: "telescope".to_string(),
            device_number: -1,
            name: "bad".to_string(),
            description: None,
            unique_id: "x".to_string(),
            backend_mode: "network".to_string(),
            backend_config: json!({}),
            organization_id: None,
            enabled: true,
            telescope_config_id: None,
        };
        assert!(AscomDevice::try_from(row).is_err());
    }
}

//! ASCOM Alpaca HTTP surface
//!
//! Management endpoints plus the device API. Device calls route through the
//! proxy pool for the addressed device; every authenticated request also
//! feeds the session tracker.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Form, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::ascom::alpaca::{
    AlpacaResponse, ConfiguredDevice, ServerDescription, ERROR_UNSPECIFIED,
};
use crate::ascom::auth::AuthenticatedUser;
use crate::ascom::devices::DeviceRegistry;
use crate::ascom::proxy::{DeviceParams, ProxyPool};
use crate::ascom::session::SessionManager;
use crate::config::AscomDescriptionConfig;
use crate::error::Error;

/// Shared state behind the Alpaca router
pub struct AscomGateway {
    description: AscomDescriptionConfig,
    registry: Arc<DeviceRegistry>,
    pools: HashMap<(String, u32), Arc<ProxyPool>>,
    sessions: Arc<SessionManager>,
}

pub type GatewayState = Arc<AscomGateway>;

impl AscomGateway {
    pub fn new(
        description: AscomDescriptionConfig,
        registry: Arc<DeviceRegistry>,
        pools: HashMap<(String, u32), Arc<ProxyPool>>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            description,
            registry,
            pools,
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    fn pool(&self, device_type: &str, device_number: u32) -> Option<&Arc<ProxyPool>> {
        self.pools.get(&(device_type.to_string(), device_number))
    }
}

/// Build the Alpaca router over the gateway state
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/management/apiversions", get(api_versions))
        .route("/management/v1/description", get(description))
        .route("/management/v1/configureddevices", get(configured_devices))
        .route(
            "/api/v1/{device_type}/{device_number}/{method}",
            get(device_get).put(device_put),
        )
        .with_state(state)
}

async fn api_versions() -> Json<AlpacaResponse> {
    Json(AlpacaResponse::ok(json!([1])))
}

async fn description(State(state): State<GatewayState>) -> Json<AlpacaResponse> {
    let description = ServerDescription {
        server_name: state.description.server_name.clone(),
        manufacturer: state.description.manufacturer.clone(),
        manufacturer_version: state.description.manufacturer_version.clone(),
        location: state.description.location.clone(),
    };
    Json(AlpacaResponse::ok(
        serde_json::to_value(description).unwrap_or_default(),
    ))
}

async fn configured_devices(State(state): State<GatewayState>) -> Json<AlpacaResponse> {
    let devices: Vec<ConfiguredDevice> = state
        .registry
        .all()
        .await
        .iter()
        .map(|device| ConfiguredDevice {
            device_name: device.name.clone(),
            device_type: device.device_type.clone(),
            device_number: device.device_number,
            unique_id: device.unique_id.clone(),
        })
        .collect();
    Json(AlpacaResponse::ok(
        serde_json::to_value(devices).unwrap_or_default(),
    ))
}

async fn device_get(
    State(state): State<GatewayState>,
    Path((device_type, device_number, method)): Path<(String, u32, String)>,
    headers: HeaderMap,
    user: Option<Extension<AuthenticatedUser>>,
    Query(params): Query<DeviceParams>,
) -> std::result::Result<(StatusCode, Json<AlpacaResponse>), Error> {
    dispatch(
        &state,
        &device_type,
        device_number,
        &method,
        params,
        &headers,
        user.map(|Extension(u)| u),
        false,
    )
    .await
}

async fn device_put(
    State(state): State<GatewayState>,
    Path((device_type, device_number, method)): Path<(String, u32, String)>,
    headers: HeaderMap,
    user: Option<Extension<AuthenticatedUser>>,
    Form(params): Form<DeviceParams>,
) -> std::result::Result<(StatusCode, Json<AlpacaResponse>), Error> {
    dispatch(
        &state,
        &device_type,
        device_number,
        &method,
        params,
        &headers,
        user.map(|Extension(u)| u),
        true,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    state: &AscomGateway,
    device_type: &str,
    device_number: u32,
    method: &str,
    params: DeviceParams,
    headers: &HeaderMap,
    user: Option<AuthenticatedUser>,
    write: bool,
) -> std::result::Result<(StatusCode, Json<AlpacaResponse>), Error> {
    // The authorization layer already resolved the device; this re-lookup
    // can still miss if a registry refresh dropped it in between, and must
    // then agree with that layer's error shape
    let Some(device) = state.registry.lookup(device_type, device_number).await else {
        return Err(Error::NotFound(format!(
            "no device {}/{}",
            device_type, device_number
        )));
    };

    track_session(state, &params, headers, user.as_ref(), device.id, write).await;

    let Some(pool) = state.pool(device_type, device_number) else {
        return Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AlpacaResponse::error(
                ERROR_UNSPECIFIED,
                format!("no backend pool for {}/{}", device_type, device_number),
            )),
        ));
    };

    let result = if write {
        pool.put(method, &params).await
    } else {
        pool.get(method, &params).await
    };

    let response = match result {
        Ok(value) => (StatusCode::OK, Json(AlpacaResponse::ok(value))),
        // Device-level errors are successful HTTP exchanges in Alpaca terms
        Err(Error::Device { code, message }) => {
            (StatusCode::OK, Json(AlpacaResponse::error(code, message)))
        }
        Err(e) => {
            tracing::error!(
                device_type,
                device_number,
                method,
                "device call failed: {}", e
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AlpacaResponse::error(ERROR_UNSPECIFIED, e.to_string())),
            )
        }
    };

    Ok(response)
}

/// Feed the session tracker from one device request
async fn track_session(
    state: &AscomGateway,
    params: &DeviceParams,
    headers: &HeaderMap,
    user: Option<&AuthenticatedUser>,
    device_id: uuid::Uuid,
    write: bool,
) {
    let Some(client_id) = params
        .get("ClientID")
        .or_else(|| params.get("clientid"))
        .and_then(|v| v.parse::<i32>().ok())
    else {
        return;
    };

    let (client_name, client_version) = parse_user_agent(headers);
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("unknown")
        .trim()
        .to_string();

    let session = match state
        .sessions
        .get_or_create_session(client_id, &client_name, &client_version, &client_ip, device_id)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(client_id, "session tracking unavailable: {}", e);
            return;
        }
    };

    if let Some(user) = user {
        let linked = session.read().await.user_id.as_deref() == Some(user.user_id.as_str());
        if !linked {
            if let Err(e) = state
                .sessions
                .link_session_to_user(client_id, device_id, &user.user_id, user.username.as_deref())
                .await
            {
                tracing::warn!(client_id, "failed to link session user: {}", e);
            }
        }
    }

    let counted = if write {
        state.sessions.record_command(client_id, device_id).await
    } else {
        state.sessions.record_query(client_id, device_id).await
    };
    if let Err(e) = counted {
        tracing::warn!(client_id, "failed to count session activity: {}", e);
    }
}

/// Split a `Name/Version` user agent into its parts
fn parse_user_agent(headers: &HeaderMap) -> (String, String) {
    let agent = headers
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    match agent.split_once('/') {
        Some((name, version)) => (name.to_string(), version.to_string()),
        None => (agent.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_agent() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::USER_AGENT, "NINA/3.1.2".parse().unwrap());
        assert_eq!(
            parse_user_agent(&headers),
            ("NINA".to_string(), "3.1.2".to_string())
        );

        let mut headers = HeaderMap::new();
        headers.insert(http::header::USER_AGENT, "SharpCap".parse().unwrap());
        assert_eq!(
            parse_user_agent(&headers),
            ("SharpCap".to_string(), String::new())
        );

        assert_eq!(
            parse_user_agent(&HeaderMap::new()),
            ("unknown".to_string(), String::new())
        );
    }

    #[tokio::test]
    async fn test_api_versions_payload() {
        let Json(response) = api_versions().await;
        assert!(response.is_ok());
        assert_eq!(response.value, json!([1]));
    }
}

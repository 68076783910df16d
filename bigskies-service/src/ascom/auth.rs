//! ASCOM authentication middleware
//!
//! Bearer tokens are validated over the bus: the middleware publishes a
//! validation request on the security coordinator's auth topic and blocks on
//! the correlated response. The resolved identity rides the request
//! extensions into the authorization layer.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use http::Method;
use rumqttc::QoS;

use crate::bus::{topic, BusClient, Envelope, MessageType};
use crate::config::AscomAuthConfig;
use crate::coordinator::ResponseCorrelator;
use crate::error::{Error, Result};
use crate::messages::{AuthValidateRequest, AuthValidateResponse};

/// Identity attached to authenticated requests
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub username: Option<String>,
    pub email: Option<String>,
}

/// Authentication middleware state
#[derive(Clone)]
pub struct AscomAuth {
    config: AscomAuthConfig,
    correlator: Arc<ResponseCorrelator>,
    source: String,
}

impl AscomAuth {
    pub fn new(config: AscomAuthConfig, correlator: Arc<ResponseCorrelator>) -> Self {
        Self {
            config,
            correlator,
            source: "coordinator:ascom".to_string(),
        }
    }

    /// Pull the bearer token off a request
    ///
    /// Extraction order: `Authorization: Bearer <t>`, then a raw
    /// `Authorization` header, then the `token` query parameter. Empty values
    /// count as absent.
    pub fn extract_token(request: &Request) -> Option<String> {
        if let Some(header) = request
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }

        request
            .uri()
            .query()
            .and_then(|query| {
                query.split('&').find_map(|pair| {
                    pair.strip_prefix("token=").filter(|v| !v.is_empty())
                })
            })
            .map(str::to_string)
    }

    /// Round-trip the security coordinator for a verdict on the token
    pub async fn validate_token(&self, token: &str) -> Result<AuthenticatedUser> {
        let source = self.source.clone();
        let token = token.to_string();

        let bytes = self
            .correlator
            .publish_and_wait(
                topic::AUTH_VALIDATE,
                QoS::AtLeastOnce,
                self.config.token_validation_timeout(),
                move |request_id| {
                    let request = AuthValidateRequest {
                        request_id: request_id.to_string(),
                        token,
                    };
                    Envelope::wrap(MessageType::Request, source, &request)?.to_bytes()
                },
            )
            .await?;

        let response: AuthValidateResponse = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Validation(format!("malformed auth response: {}", e)))?;

        if !response.valid {
            return Err(Error::Unauthorized(
                response.error.unwrap_or_else(|| "invalid token".to_string()),
            ));
        }

        let user_id = response
            .user_id
            .ok_or_else(|| Error::Unauthorized("auth response missing user id".to_string()))?;

        Ok(AuthenticatedUser {
            user_id,
            username: response.username,
            email: response.email,
        })
    }

    /// Middleware entry point
    pub async fn middleware(
        State(auth): State<AscomAuth>,
        mut request: Request,
        next: Next,
    ) -> std::result::Result<Response, Error> {
        if !auth.config.require_auth {
            return Ok(next.run(request).await);
        }

        let token = match Self::extract_token(&request) {
            Some(token) => token,
            None => {
                if auth.config.allow_anonymous_read && request.method() == Method::GET {
                    // Anonymous read: no identity attached; the authorization
                    // layer decides what an unowned device permits
                    return Ok(next.run(request).await);
                }
                return Err(Error::Unauthorized("authentication required".to_string()));
            }
        };

        let user = auth.validate_token(&token).await?;
        tracing::debug!(user_id = %user.user_id, "request authenticated");
        request.extensions_mut().insert(user);

        Ok(next.run(request).await)
    }
}

/// Route auth-validate responses from the bus into the correlator
pub async fn attach_response_listener(
    bus: &Arc<BusClient>,
    correlator: Arc<ResponseCorrelator>,
) -> Result<()> {
    bus.subscribe(
        topic::AUTH_VALIDATE_RESPONSE,
        QoS::AtLeastOnce,
        move |msg| {
            let correlator = Arc::clone(&correlator);
            async move {
                let envelope = match Envelope::from_bytes(&msg.payload) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::warn!("Ignoring malformed auth response: {}", e);
                        return;
                    }
                };
                let response: AuthValidateResponse = match envelope.payload_as() {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!("Ignoring malformed auth response payload: {}", e);
                        return;
                    }
                };
                match serde_json::to_vec(&envelope.payload) {
                    Ok(bytes) => {
                        correlator.complete(&response.request_id, bytes);
                    }
                    Err(e) => tracing::error!("Failed to re-encode auth payload: {}", e),
                }
            }
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use axum::body::Body;

    fn request(builder: http::request::Builder) -> Request {
        builder.body(Body::empty()).unwrap()
    }

    fn auth(config: AscomAuthConfig) -> AscomAuth {
        let bus = Arc::new(BusClient::new(BusConfig::default(), "ascom"));
        AscomAuth::new(config, Arc::new(ResponseCorrelator::new(bus)))
    }

    #[test]
    fn test_bearer_header_preferred() {
        let req = request(
            Request::builder()
                .uri("/api/v1/telescope/0/altitude?token=query-token")
                .header("Authorization", "Bearer header-token"),
        );
        assert_eq!(AscomAuth::extract_token(&req).as_deref(), Some("header-token"));
    }

    #[test]
    fn test_raw_authorization_header() {
        let req = request(
            Request::builder()
                .uri("/api/v1/telescope/0/altitude")
                .header("Authorization", "raw-token"),
        );
        assert_eq!(AscomAuth::extract_token(&req).as_deref(), Some("raw-token"));
    }

    #[test]
    fn test_query_parameter_fallback() {
        let req = request(
            Request::builder().uri("/api/v1/telescope/0/altitude?ClientID=3&token=qt"),
        );
        assert_eq!(AscomAuth::extract_token(&req).as_deref(), Some("qt"));
    }

    #[test]
    fn test_empty_values_count_as_absent() {
        let req = request(
            Request::builder()
                .uri("/api/v1/telescope/0/altitude?token=")
                .header("Authorization", ""),
        );
        assert_eq!(AscomAuth::extract_token(&req), None);
    }

    #[test]
    fn test_no_token_anywhere() {
        let req = request(Request::builder().uri("/api/v1/telescope/0/altitude"));
        assert_eq!(AscomAuth::extract_token(&req), None);
    }

    #[tokio::test]
    async fn test_validate_token_with_dead_bus_fails() {
        // The bus is never connected; the round trip fails before waiting
        let auth = auth(AscomAuthConfig::default());
        let err = auth.validate_token("tok").await.unwrap_err();
        assert!(matches!(err, Error::BusNotConnected));
    }

    #[test]
    fn test_invalid_verdict_maps_to_unauthorized() {
        let response = AuthValidateResponse {
            request_id: "r".to_string(),
            valid: false,
            user_id: None,
            username: None,
            email: None,
            error: Some("token expired".to_string()),
        };
        // The mapping validate_token applies to a negative verdict
        let err = if response.valid {
            None
        } else {
            Some(Error::Unauthorized(
                response.error.unwrap_or_else(|| "invalid token".to_string()),
            ))
        }
        .unwrap();
        assert!(matches!(err, Error::Unauthorized(msg) if msg == "token expired"));
    }
}

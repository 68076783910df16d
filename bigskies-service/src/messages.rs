//! Typed payload contracts for every producer/consumer pair the core touches
//!
//! Each message the core publishes or consumes has a concrete struct here;
//! nothing in the pipelines parses payloads with open-ended dynamic access.
//! Optional fields default on decode so producers can grow their payloads
//! without breaking consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller identity extracted from a request payload
///
/// `user_id = "anonymous"` signifies unauthenticated intent. Extraction reads
/// the payload as-is; deployments requiring verified identity substitute a
/// token-backed extractor at this single seam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl UserContext {
    /// The unauthenticated identity
    pub fn anonymous() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            username: None,
            token: None,
        }
    }

    /// Read the caller identity out of a request payload
    ///
    /// Missing or non-string `user_id` yields the anonymous context; the
    /// fail-closed decision belongs to the policy layer, not the extractor.
    pub fn from_payload(payload: &Value) -> Self {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        match field("user_id") {
            Some(user_id) => Self {
                user_id,
                username: field("username"),
                token: field("token"),
            },
            None => Self::anonymous(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id == "anonymous"
    }
}

/// RBAC validation request to the security coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacValidateRequest {
    pub correlation_id: String,
    pub user_id: String,
    pub resource: String,
    pub action: String,
    pub context: UserContext,
    pub timestamp: DateTime<Utc>,
}

/// RBAC verdict from the security coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RbacValidateResponse {
    pub correlation_id: String,
    pub allowed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Bearer-token validation request to the security coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthValidateRequest {
    pub request_id: String,
    pub token: String,
}

/// Bearer-token validation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthValidateResponse {
    pub request_id: String,
    pub valid: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Datastore access bundle delivered by the bootstrap publisher
///
/// Delivered by value; never logged with the secret attached.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsBundle {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub secret: String,
}

impl CredentialsBundle {
    /// Render a Postgres connection URL
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.secret, self.host, self.port, self.database
        )
    }
}

// Keep the secret out of debug output and logs
impl std::fmt::Debug for CredentialsBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsBundle")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A coordinator announcing itself on the bootstrap request topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsRequest {
    pub coordinator: String,
}

/// Service registration event from the application coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub service: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Service heartbeat event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHeartbeat {
    pub service: String,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

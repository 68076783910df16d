//! The fixed JSON wrapper around every bus payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Message classification carried in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Event,
    Status,
    Command,
    Query,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Event => "event",
            Self::Status => "status",
            Self::Command => "command",
            Self::Query => "query",
        };
        write!(f, "{}", s)
    }
}

/// Envelope wrapping every payload published on the bus
///
/// Consumers must tolerate unknown payload fields; the envelope itself is
/// forward-compatible the same way (unknown top-level fields are ignored on
/// decode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Globally unique message id, generated at publish time
    pub id: String,

    /// Message classification
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// Logical identifier of the publisher, e.g. `coordinator:message`
    pub source: String,

    /// Publish instant
    pub timestamp: DateTime<Utc>,

    /// Component-defined payload
    pub payload: Value,

    /// Set on messages republished after an RBAC allow verdict so the
    /// interceptor does not re-queue its own republish. Absent otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized: Option<bool>,
}

impl Envelope {
    /// Create a new envelope with a fresh id and the current instant
    pub fn new(message_type: MessageType, source: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            source: source.into(),
            timestamp: Utc::now(),
            payload,
            authorized: None,
        }
    }

    /// Envelope a serializable payload
    pub fn wrap<T: Serialize>(
        message_type: MessageType,
        source: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        Ok(Self::new(message_type, source, serde_json::to_value(payload)?))
    }

    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Internal(format!("envelope encode: {}", e)))
    }

    /// Parse an envelope from wire bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Validation(format!("malformed envelope: {}", e)))
    }

    /// Deserialize the payload into a concrete message type
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| Error::Validation(format!("malformed payload: {}", e)))
    }

    /// Whether this envelope was already cleared by the RBAC interceptor
    pub fn is_authorized(&self) -> bool {
        self.authorized == Some(true)
    }

    /// Stamp the post-authorization marker
    pub fn mark_authorized(mut self) -> Self {
        self.authorized = Some(true);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_identity() {
        let env = Envelope::new(
            MessageType::Request,
            "coordinator:message",
            json!({"user_id": "u1", "value": 42}),
        );
        let bytes = env.to_bytes().unwrap();
        let back = Envelope::from_bytes(&bytes).unwrap();

        assert_eq!(back.id, env.id);
        assert_eq!(back.message_type, MessageType::Request);
        assert_eq!(back.source, "coordinator:message");
        assert_eq!(back.timestamp, env.timestamp);
        assert_eq!(back.payload, env.payload);
        assert!(back.authorized.is_none());
    }

    #[test]
    fn test_wire_field_names() {
        let env = Envelope::new(MessageType::Event, "coordinator:plugin", json!({}));
        let value: serde_json::Value = serde_json::from_slice(&env.to_bytes().unwrap()).unwrap();
        assert!(value.get("id").is_some());
        assert_eq!(value.get("type").unwrap(), "event");
        assert!(value.get("source").is_some());
        assert!(value.get("timestamp").is_some());
        assert!(value.get("payload").is_some());
        // The marker never appears on ordinary traffic
        assert!(value.get("authorized").is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Envelope::new(MessageType::Event, "s", json!({}));
        let b = Envelope::new(MessageType::Event, "s", json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_unknown_fields_tolerated() {
        let raw = r#"{
            "id": "abc",
            "type": "status",
            "source": "coordinator:security",
            "timestamp": "2026-01-01T00:00:00Z",
            "payload": {"ok": true},
            "some_future_field": [1, 2, 3]
        }"#;
        let env = Envelope::from_bytes(raw.as_bytes()).unwrap();
        assert_eq!(env.id, "abc");
        assert_eq!(env.message_type, MessageType::Status);
    }

    #[test]
    fn test_malformed_envelope_is_validation_error() {
        let err = Envelope::from_bytes(b"{\"id\": 7}").unwrap_err();
        assert!(matches!(err, crate::error::Error::Validation(_)));
    }

    #[test]
    fn test_authorized_marker() {
        let env = Envelope::new(MessageType::Command, "coordinator:message", json!({}));
        assert!(!env.is_authorized());
        let env = env.mark_authorized();
        assert!(env.is_authorized());

        let bytes = env.to_bytes().unwrap();
        let back = Envelope::from_bytes(&bytes).unwrap();
        assert!(back.is_authorized());
    }

    #[test]
    fn test_payload_as_concrete_type() {
        #[derive(Deserialize)]
        struct Ping {
            seq: u64,
        }

        let env = Envelope::new(MessageType::Query, "s", json!({"seq": 9, "extra": "x"}));
        let ping: Ping = env.payload_as().unwrap();
        assert_eq!(ping.seq, 9);
    }
}

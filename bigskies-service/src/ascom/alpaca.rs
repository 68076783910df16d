//! ASCOM Alpaca wire format
//!
//! Every device response is the canonical `{Value, ErrorNumber, ErrorMessage}`
//! envelope; the management endpoints use the same shape with structured
//! values. Field names are bit-exact with the Alpaca specification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Success
pub const ERROR_OK: i32 = 0;
/// Alpaca 0x400: method not implemented by the device
pub const ERROR_NOT_IMPLEMENTED: i32 = 0x400;
/// Alpaca 0x401: invalid parameter value
pub const ERROR_INVALID_VALUE: i32 = 0x401;
/// Alpaca 0x407: device not connected
pub const ERROR_NOT_CONNECTED: i32 = 0x407;
/// Alpaca 0x500: unspecified device error
pub const ERROR_UNSPECIFIED: i32 = 0x500;

/// The canonical Alpaca response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlpacaResponse {
    #[serde(rename = "Value", default)]
    pub value: Value,

    #[serde(rename = "ErrorNumber", default)]
    pub error_number: i32,

    #[serde(rename = "ErrorMessage", default)]
    pub error_message: String,
}

impl AlpacaResponse {
    /// A successful response carrying a value
    pub fn ok(value: Value) -> Self {
        Self {
            value,
            error_number: ERROR_OK,
            error_message: String::new(),
        }
    }

    /// A device-level error response
    pub fn error(error_number: i32, message: impl Into<String>) -> Self {
        Self {
            value: Value::Null,
            error_number,
            error_message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_number == ERROR_OK
    }
}

/// Server metadata served on `/management/v1/description`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescription {
    #[serde(rename = "ServerName")]
    pub server_name: String,

    #[serde(rename = "Manufacturer")]
    pub manufacturer: String,

    #[serde(rename = "ManufacturerVersion")]
    pub manufacturer_version: String,

    #[serde(rename = "Location")]
    pub location: String,
}

/// One entry of `/management/v1/configureddevices`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfiguredDevice {
    #[serde(rename = "DeviceName")]
    pub device_name: String,

    #[serde(rename = "DeviceType")]
    pub device_type: String,

    #[serde(rename = "DeviceNumber")]
    pub device_number: u32,

    #[serde(rename = "UniqueID")]
    pub unique_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_response_wire_shape() {
        let response = AlpacaResponse::ok(json!(23.5));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["Value"], 23.5);
        assert_eq!(value["ErrorNumber"], 0);
        assert_eq!(value["ErrorMessage"], "");
    }

    #[test]
    fn test_error_response() {
        let response = AlpacaResponse::error(ERROR_NOT_CONNECTED, "telescope offline");
        assert!(!response.is_ok());
        assert_eq!(response.error_number, 0x407);
        assert_eq!(response.error_message, "telescope offline");
    }

    #[test]
    fn test_backend_envelope_parse() {
        // What a remote ASCOM server returns
        let raw = r#"{"Value": true, "ErrorNumber": 0, "ErrorMessage": ""}"#;
        let response: AlpacaResponse = serde_json::from_str(raw).unwrap();
        assert!(response.is_ok());
        assert_eq!(response.value, json!(true));
    }

    #[test]
    fn test_missing_fields_default() {
        let response: AlpacaResponse = serde_json::from_str("{}").unwrap();
        assert!(response.is_ok());
        assert!(response.value.is_null());
    }

    #[test]
    fn test_configured_device_field_names() {
        let device = ConfiguredDevice {
            device_name: "Main scope".to_string(),
            device_type: "telescope".to_string(),
            device_number: 0,
            unique_id: "bs-tel-0".to_string(),
        };
        let value = serde_json::to_value(&device).unwrap();
        assert_eq!(value["DeviceName"], "Main scope");
        assert_eq!(value["DeviceType"], "telescope");
        assert_eq!(value["DeviceNumber"], 0);
        assert_eq!(value["UniqueID"], "bs-tel-0");
    }
}

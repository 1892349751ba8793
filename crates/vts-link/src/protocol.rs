//! Wire types for the avatar host's JSON-over-WebSocket API.
//!
//! Requests and responses share one envelope shape; the payload under `data`
//! depends on `messageType`. Field names follow the avatar host's own casing,
//! including the handful of fields that are not plain camelCase (`requestID`,
//! `hotkeyID`, `errorID`).

use serde::{Deserialize, Serialize};

pub const API_NAME: &str = "VTubeStudioPublicAPI";
pub const API_VERSION: &str = "1.0";

/// Identity presented to the avatar host when requesting a token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub plugin_name: String,
    pub plugin_developer: String,
}

/// Outbound message types understood by the avatar host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestType {
    AuthenticationTokenRequest,
    AuthenticationRequest,
    #[serde(rename = "APIStateRequest")]
    ApiStateRequest,
    InjectParameterDataRequest,
    ExpressionActivationRequest,
    HotkeyTriggerRequest,
}

/// The envelope wrapped around every outbound request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub api_name: &'static str,
    pub api_version: &'static str,
    #[serde(rename = "requestID")]
    pub request_id: String,
    pub message_type: RequestType,
    pub data: serde_json::Value,
}

impl RequestEnvelope {
    pub fn new(
        request_id: impl Into<String>,
        message_type: RequestType,
        data: serde_json::Value,
    ) -> Self {
        Self {
            api_name: API_NAME,
            api_version: API_VERSION,
            request_id: request_id.into(),
            message_type,
            data,
        }
    }

    /// Serializes the envelope into a text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// The envelope wrapped around every inbound frame.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub api_name: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(rename = "requestID", default)]
    pub request_id: String,
    pub message_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthenticationRequestData {
    pub plugin_name: String,
    pub plugin_developer: String,
    pub authentication_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthenticationTokenResponseData {
    pub authentication_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthenticationResponseData {
    pub authenticated: bool,
    #[serde(default)]
    pub reason: String,
}

/// Session state reported by the avatar host.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStateData {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub v_tube_studio_version: String,
    pub current_session_authenticated: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorData {
    #[serde(rename = "errorID", default)]
    pub error_id: i64,
    #[serde(default)]
    pub message: String,
}

/// One tracking parameter to inject, by id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterValue {
    pub id: String,
    pub value: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InjectParameterData {
    pub face_found: bool,
    pub mode: &'static str,
    pub parameter_values: Vec<ParameterValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExpressionActivationData {
    pub expression_file: String,
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct HotkeyTriggerData {
    #[serde(rename = "hotkeyID")]
    pub hotkey_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_envelope_uses_host_field_names() {
        let envelope = RequestEnvelope::new(
            "req-1",
            RequestType::ApiStateRequest,
            serde_json::Value::Null,
        );
        let value: serde_json::Value =
            serde_json::from_str(&envelope.to_frame().unwrap()).unwrap();

        assert_eq!(value["apiName"], "VTubeStudioPublicAPI");
        assert_eq!(value["apiVersion"], "1.0");
        assert_eq!(value["requestID"], "req-1");
        assert_eq!(value["messageType"], "APIStateRequest");
        assert!(value["data"].is_null());
    }

    #[test]
    fn trigger_payloads_use_host_field_names() {
        let hotkey = serde_json::to_value(HotkeyTriggerData {
            hotkey_id: "StartSpeaking".into(),
        })
        .unwrap();
        assert_eq!(hotkey, json!({"hotkeyID": "StartSpeaking"}));

        let expression = serde_json::to_value(ExpressionActivationData {
            expression_file: "Speaking.exp3.json".into(),
            active: true,
        })
        .unwrap();
        assert_eq!(
            expression,
            json!({"expressionFile": "Speaking.exp3.json", "active": true})
        );

        let inject = serde_json::to_value(InjectParameterData {
            face_found: false,
            mode: "set",
            parameter_values: vec![ParameterValue {
                id: "MouthOpen".into(),
                value: 0.8,
            }],
        })
        .unwrap();
        assert_eq!(
            inject,
            json!({
                "faceFound": false,
                "mode": "set",
                "parameterValues": [{"id": "MouthOpen", "value": 0.8}]
            })
        );
    }

    #[test]
    fn response_envelope_tolerates_missing_optional_fields() {
        let envelope: ResponseEnvelope = serde_json::from_value(json!({
            "messageType": "APIStateResponse",
            "data": {"active": true, "currentSessionAuthenticated": false}
        }))
        .unwrap();

        assert_eq!(envelope.message_type, "APIStateResponse");
        assert!(envelope.request_id.is_empty());

        let state: ApiStateData = serde_json::from_value(envelope.data).unwrap();
        assert!(state.active);
        assert!(!state.current_session_authenticated);
    }

    #[test]
    fn api_error_payload_parses() {
        let err: ApiErrorData = serde_json::from_value(json!({
            "errorID": 50,
            "message": "user denied plugin access"
        }))
        .unwrap();
        assert_eq!(err.error_id, 50);
        assert_eq!(err.message, "user denied plugin access");
    }
}

//! JSON frame codec
//!
//! Every frame is `{name, request_id?, msg, status?}`. Outbound calls are
//! wrapped in `sendMessage` / `subscribeMessage` / `unsubscribeMessage`
//! envelopes carrying the inner message name and version.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Status codes at or above this value reject the correlated call
pub const ERROR_STATUS_FLOOR: u16 = 4000;

/// Frame decoding errors
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame is not valid JSON or lacks a name
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One protocol frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub msg: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl Frame {
    /// Decode an inbound text frame
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode for the wire
    pub fn encode(&self) -> String {
        // a Frame only holds strings, integers and a JSON value
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Request/response call
    pub fn request(request_id: &str, name: &str, version: &str, body: Value) -> Self {
        Self::envelope(
            "sendMessage",
            request_id,
            json!({ "name": name, "version": version, "body": body }),
        )
    }

    /// Push subscription
    pub fn subscribe(request_id: &str, name: &str, version: &str, params: Value) -> Self {
        Self::envelope(
            "subscribeMessage",
            request_id,
            json!({ "name": name, "version": version, "params": params }),
        )
    }

    /// Push unsubscription
    pub fn unsubscribe(request_id: &str, name: &str, version: &str, params: Value) -> Self {
        Self::envelope(
            "unsubscribeMessage",
            request_id,
            json!({ "name": name, "version": version, "params": params }),
        )
    }

    /// Session token presentation
    pub fn authenticate(request_id: &str, token: &str) -> Self {
        Self::envelope("authenticate", request_id, json!({ "ssid": token }))
    }

    fn envelope(name: &str, request_id: &str, msg: Value) -> Self {
        Self {
            name: name.to_string(),
            request_id: Some(request_id.to_string()),
            msg,
            status: None,
        }
    }

    /// Whether this frame rejects the call it answers
    pub fn is_error(&self) -> bool {
        self.name == "error"
            || self.status.is_some_and(|s| s >= ERROR_STATUS_FLOOR)
            || (self.name == "authenticated" && self.msg == Value::Bool(false))
    }

    /// Best-effort human-readable reason from an error frame
    pub fn error_message(&self) -> String {
        match &self.msg {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| self.msg.to_string()),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let frame = Frame::parse(r#"{"name":"result","request_id":"7","msg":{"ok":true},"status":2000}"#)
            .unwrap();
        assert_eq!(frame.name, "result");
        assert_eq!(frame.request_id.as_deref(), Some("7"));
        assert_eq!(frame.status, Some(2000));
        assert!(!frame.is_error());
    }

    #[test]
    fn test_parse_push_without_request_id() {
        let frame = Frame::parse(r#"{"name":"candle-generated","msg":{"active_id":1}}"#).unwrap();
        assert!(frame.request_id.is_none());
        assert_eq!(frame.msg["active_id"], 1);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(Frame::parse("not json").is_err());
        assert!(Frame::parse(r#"{"msg":{}}"#).is_err());
    }

    #[test]
    fn test_request_envelope() {
        let frame = Frame::request("42", "get-balances", "1.0", json!({"types_ids": [1, 4]}));
        let decoded: Value = serde_json::from_str(&frame.encode()).unwrap();
        assert_eq!(decoded["name"], "sendMessage");
        assert_eq!(decoded["request_id"], "42");
        assert_eq!(decoded["msg"]["name"], "get-balances");
        assert_eq!(decoded["msg"]["body"]["types_ids"][1], 4);
        assert!(decoded.get("status").is_none());
    }

    #[test]
    fn test_error_detection() {
        let by_status = Frame::parse(r#"{"name":"result","request_id":"1","msg":"denied","status":4003}"#)
            .unwrap();
        assert!(by_status.is_error());
        assert_eq!(by_status.error_message(), "denied");

        let by_name = Frame::parse(r#"{"name":"error","request_id":"1","msg":{"message":"bad"}}"#)
            .unwrap();
        assert!(by_name.is_error());
        assert_eq!(by_name.error_message(), "bad");

        let auth = Frame::parse(r#"{"name":"authenticated","request_id":"1","msg":false}"#).unwrap();
        assert!(auth.is_error());
    }
}

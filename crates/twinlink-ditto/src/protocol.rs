//! Ditto protocol envelopes used on the live channel.

use serde_json::{json, Value};
use twinlink_core::{PropertyPath, PropertyValue, TwinIdentity};

/// Build a `modify` command setting one feature property.
pub fn modify_property(
    twin: &TwinIdentity,
    feature_id: &str,
    path: &PropertyPath,
    value: PropertyValue,
    correlation_id: &str,
) -> Value {
    json!({
        "topic": format!("{}/{}/things/twin/commands/modify", twin.namespace, twin.twin_id),
        "headers": {
            "correlation-id": correlation_id,
            "response-required": true,
            "content-type": "application/json",
        },
        "path": format!("/features/{feature_id}/properties/{path}"),
        "value": value.to_json(),
    })
}

/// A response or error envelope correlated to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub correlation_id: String,
    pub status: u16,
    /// Error description for failed commands
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn is_success(&self) -> bool {
        self.status < 300
    }
}

/// Parse an inbound text frame.
///
/// Returns `None` for anything that is not a correlated response, such as
/// events or protocol acknowledgements like `START-SEND-EVENTS:ACK`.
pub fn parse_response(text: &str) -> Option<CommandResponse> {
    let envelope: Value = serde_json::from_str(text).ok()?;
    let correlation_id = envelope
        .pointer("/headers/correlation-id")?
        .as_str()?
        .to_string();
    let status = u16::try_from(envelope.get("status")?.as_u64()?).ok()?;
    let message = if status >= 300 {
        let value = envelope.get("value");
        value
            .and_then(|v| v.get("message"))
            .or_else(|| value.and_then(|v| v.get("error")))
            .and_then(Value::as_str)
            .map(str::to_string)
    } else {
        None
    };
    Some(CommandResponse {
        correlation_id,
        status,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modify_property_envelope() {
        let twin = TwinIdentity::new("org.apache.plc4x.examples", "abc");
        let cmd = modify_property(
            &twin,
            "virtualmachine",
            &PropertyPath::configuration("temp"),
            PropertyValue::Double(21.5),
            "c-1",
        );
        assert_eq!(
            cmd["topic"],
            "org.apache.plc4x.examples/abc/things/twin/commands/modify"
        );
        assert_eq!(
            cmd["path"],
            "/features/virtualmachine/properties/configuration/temp"
        );
        assert_eq!(cmd["value"], 21.5);
        assert_eq!(cmd["headers"]["correlation-id"], "c-1");
        assert_eq!(cmd["headers"]["response-required"], true);
    }

    #[test]
    fn test_parse_success_response() {
        let text = r#"{"topic":"ns/abc/things/twin/commands/modify","headers":{"correlation-id":"c-1"},"path":"/features/f/properties/configuration/temp","status":204}"#;
        let response = parse_response(text).unwrap();
        assert_eq!(response.correlation_id, "c-1");
        assert_eq!(response.status, 204);
        assert!(response.is_success());
        assert_eq!(response.message, None);
    }

    #[test]
    fn test_parse_error_response() {
        let text = r#"{"topic":"ns/abc/things/twin/errors","headers":{"correlation-id":"c-2"},"path":"/","value":{"status":403,"error":"things:feature.notmodifiable","message":"not allowed"},"status":403}"#;
        let response = parse_response(text).unwrap();
        assert_eq!(response.status, 403);
        assert!(!response.is_success());
        assert_eq!(response.message.as_deref(), Some("not allowed"));
    }

    #[test]
    fn test_ignores_uncorrelated_frames() {
        assert_eq!(parse_response("START-SEND-EVENTS:ACK"), None);
        assert_eq!(parse_response(r#"{"topic":"ns/abc/things/twin/events/modified","headers":{},"path":"/"}"#), None);
    }
}

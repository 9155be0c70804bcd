use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value of the `rtpforward` key on every event this plugin emits
pub const EVENT_TAG: &str = "event";

/// Numeric error codes carried in `error_code`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    NoMessage = 411,
    InvalidJson = 412,
    InvalidElement = 413,
    InvalidSdp = 414,
    MissingElement = 415,
    UnknownError = 416,
    SocketFailure = 417,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Reply body, either returned synchronously or pushed as an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub rtpforward: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configured: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Event {
    fn tagged() -> Self {
        Self {
            rtpforward: EVENT_TAG.to_string(),
            ..Default::default()
        }
    }

    /// Generic success
    pub fn ok() -> Self {
        Self {
            result: Some("ok".to_string()),
            ..Self::tagged()
        }
    }

    /// Reply to a successful `configure`
    pub fn configured() -> Self {
        Self {
            configured: Some("ok".to_string()),
            ..Self::tagged()
        }
    }

    pub fn error(code: ErrorCode, cause: impl Into<String>) -> Self {
        Self {
            error_code: Some(code.as_u16()),
            error: Some(cause.into()),
            ..Self::tagged()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_code.is_some()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        assert_eq!(
            Event::configured().to_value(),
            json!({ "rtpforward": "event", "configured": "ok" })
        );
        assert_eq!(
            Event::error(ErrorCode::MissingElement, "Missing element: sendipv4").to_value(),
            json!({
                "rtpforward": "event",
                "error_code": 415,
                "error": "Missing element: sendipv4"
            })
        );
    }

    #[test]
    fn test_event_round_trip_through_json() {
        let event: Event = serde_json::from_value(json!({
            "rtpforward": "event",
            "error_code": 414,
            "error": "bad offer"
        }))
        .unwrap();
        assert!(event.is_error());
        assert_eq!(event.error_code, Some(ErrorCode::InvalidSdp.as_u16()));
        assert!(!Event::ok().is_error());
    }
}

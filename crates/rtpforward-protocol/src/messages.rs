use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// Synchronous commands understood by the control handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Request {
    /// Set the UDP target and codec preferences, (re)open the outbound socket
    Configure,
    /// Ask the browser for a keyframe with a Picture Loss Indication
    Pli,
    /// Ask the browser for a keyframe with a Full Intra Request
    Fir,
    /// Cap the browser's send bitrate with a REMB message
    Remb,
}

impl Request {
    /// Map a `request` string to a synchronous command.
    ///
    /// Unknown names return `None`; such messages take the asynchronous path.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "configure" => Some(Request::Configure),
            "pli" => Some(Request::Pli),
            "fir" => Some(Request::Fir),
            "remb" => Some(Request::Remb),
            _ => None,
        }
    }
}

/// Body of a message sent by the browser through the gateway
///
/// Every field is optional on the wire. Which ones are required depends on
/// `request`; the handler checks that, not serde.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub request: Option<String>,

    pub sendipv4: Option<String>,
    pub sendport_video_rtp: Option<u16>,
    pub sendport_video_rtcp: Option<u16>,
    pub sendport_audio_rtp: Option<u16>,
    pub sendport_audio_rtcp: Option<u16>,

    pub negotiate_acodec: Option<String>,
    pub negotiate_vcodec: Option<String>,

    pub bitrate: Option<u32>,

    pub enable_video_on_keyframe: Option<bool>,
    pub disable_video_on_packetloss: Option<bool>,
    pub video_enabled: Option<bool>,
    pub audio_enabled: Option<bool>,

    /// Packet-loss simulation strength in parts per thousand
    pub drop_probability: Option<u16>,
    pub drop_video_packets: Option<u32>,
    pub drop_audio_packets: Option<u32>,
}

impl ControlMessage {
    /// Decode a message body handed over by the gateway.
    pub fn from_value(body: &Value) -> Result<Self, ProtocolError> {
        if !body.is_object() {
            return Err(ProtocolError::NotAnObject);
        }
        Ok(ControlMessage::deserialize(body)?)
    }

    /// The synchronous command this message carries, if any
    pub fn sync_request(&self) -> Option<Request> {
        self.request.as_deref().and_then(Request::parse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsepType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description carried next to a message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jsep {
    #[serde(rename = "type")]
    pub kind: JsepType,
    #[serde(default)]
    pub sdp: Option<String>,
}

impl Jsep {
    pub fn answer(sdp: String) -> Self {
        Self {
            kind: JsepType::Answer,
            sdp: Some(sdp),
        }
    }

    pub fn from_value(jsep: &Value) -> Result<Self, ProtocolError> {
        Ok(Jsep::deserialize(jsep)?)
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
    fn test_parse_configure() {
        let body = json!({
            "request": "configure",
            "sendipv4": "127.0.0.1",
            "sendport_video_rtp": 5000,
            "sendport_video_rtcp": 5001,
            "sendport_audio_rtp": 5002,
            "sendport_audio_rtcp": 5003,
            "negotiate_vcodec": "h264"
        });

        let msg = ControlMessage::from_value(&body).unwrap();
        assert_eq!(msg.sync_request(), Some(Request::Configure));
        assert_eq!(msg.sendport_audio_rtcp, Some(5003));
        assert_eq!(msg.negotiate_vcodec.as_deref(), Some("h264"));
        assert_eq!(msg.bitrate, None);
    }

    #[test]
    fn test_unknown_request_is_not_synchronous() {
        let msg = ControlMessage::from_value(&json!({ "request": "watch" })).unwrap();
        assert_eq!(msg.sync_request(), None);

        let msg = ControlMessage::from_value(&json!({ "audio_enabled": false })).unwrap();
        assert_eq!(msg.sync_request(), None);
        assert_eq!(msg.audio_enabled, Some(false));
    }

    #[test]
    fn test_rejects_bad_bodies() {
        assert!(matches!(
            ControlMessage::from_value(&json!("configure")),
            Err(ProtocolError::NotAnObject)
        ));
        assert!(ControlMessage::from_value(&json!({ "sendport_video_rtp": 70000 })).is_err());
        assert!(ControlMessage::from_value(&json!({ "video_enabled": "yes" })).is_err());
    }

    #[test]
    fn test_jsep_answer_shape() {
        let value = Jsep::answer("v=0\r\n".to_string()).to_value();
        assert_eq!(value, json!({ "type": "answer", "sdp": "v=0\r\n" }));

        let offer = Jsep::from_value(&json!({ "type": "offer", "sdp": "v=0" })).unwrap();
        assert_eq!(offer.kind, JsepType::Offer);
    }
}

//! What the plugin needs from the hosting gateway
//!
//! The gateway owns the browser-facing peer connection. It calls into
//! [`crate::RtpForward`] for session lifecycle, control messages and media,
//! and the plugin calls back through [`Gateway`] for everything that has to
//! travel toward the browser.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Opaque handle the gateway uses to identify one plugin session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway has no session {0}")]
    UnknownSession(SessionHandle),

    #[error("gateway rejected the request: {0}")]
    Rejected(String),
}

/// Callbacks into the gateway
///
/// Both calls may come from any plugin thread: the control path, the
/// signaling worker or a feedback relay worker.
pub trait Gateway: Send + Sync {
    /// Deliver an asynchronous reply for `transaction`, optionally with a
    /// JSEP object (`{"type":"answer","sdp":...}`).
    ///
    /// The gateway merges the JSEP into its own peer connection, so this must
    /// never be called from inside `handle_message`.
    fn push_event(
        &self,
        handle: SessionHandle,
        transaction: Option<&str>,
        event: Value,
        jsep: Option<Value>,
    ) -> Result<(), GatewayError>;

    /// Send an RTCP packet upstream toward the browser peer.
    fn relay_rtcp(&self, handle: SessionHandle, video: bool, packet: &[u8])
    -> Result<(), GatewayError>;
}

/// Immediate answer to `handle_message`
#[derive(Debug, Clone, PartialEq)]
pub enum PluginResult {
    /// Handled synchronously; the value is the reply body
    Ok(Value),
    /// Accepted; the reply will arrive through [`Gateway::push_event`]
    OkWait(String),
    /// Rejected by the plugin lifecycle, not by message content
    Error(String),
}

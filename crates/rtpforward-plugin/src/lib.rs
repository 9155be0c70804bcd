//! rtpforward gateway plugin
//!
//! Forwards the RTP and RTCP a browser sends to the gateway on to an external
//! UDP receiver, with per-session control over what gets through.

pub mod config;
pub mod error;
pub mod feedback;
pub mod forward;
pub mod gateway;
pub mod handler;
pub mod logging;
pub mod plugin;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod watchdog;

pub use config::Config;
pub use error::{Error, Result};
pub use forward::{DropReason, Verdict};
pub use gateway::{Gateway, GatewayError, PluginResult, SessionHandle};
pub use plugin::{METADATA, PluginMetadata, RtpForward};
pub use session::{Session, SessionInfo, TargetPorts};

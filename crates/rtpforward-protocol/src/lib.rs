//! Shared protocol definitions for rtpforward
//!
//! Control messages arrive from the browser as JSON objects relayed by the
//! gateway; replies go back as `{"rtpforward":"event", ...}` objects, with an
//! optional JSEP answer alongside.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("message body is not a JSON object")]
    NotAnObject,

    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

use rtpforward_media::MediaError;
use rtpforward_protocol::{ErrorCode, Event, ProtocolError};
use thiserror::Error;

use crate::gateway::{GatewayError, SessionHandle};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Plugin not initialized")]
    NotInitialized,

    #[error("Shutting down")]
    ShuttingDown,

    #[error("No session associated with handle {0}")]
    NoSession(SessionHandle),

    #[error("No message")]
    NoMessage,

    #[error("JSON error: {0}")]
    InvalidJson(#[from] ProtocolError),

    #[error("JSON error: Invalid element: {0}")]
    InvalidElement(String),

    #[error("JSON error: Missing element: {0}")]
    MissingElement(&'static str),

    #[error("Error parsing offer: {0}")]
    InvalidSdp(String),

    #[error("Could not create sending socket: {0}")]
    SocketCreate(#[source] std::io::Error),

    #[error("Could not build feedback packet: {0}")]
    Media(#[from] MediaError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Could not start worker: {0}")]
    Startup(#[source] std::io::Error),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NoMessage => ErrorCode::NoMessage,
            Error::InvalidJson(_) => ErrorCode::InvalidJson,
            Error::InvalidElement(_) => ErrorCode::InvalidElement,
            Error::MissingElement(_) => ErrorCode::MissingElement,
            Error::InvalidSdp(_) => ErrorCode::InvalidSdp,
            Error::SocketCreate(_) => ErrorCode::SocketFailure,
            Error::NotInitialized
            | Error::ShuttingDown
            | Error::NoSession(_)
            | Error::Media(_)
            | Error::Gateway(_)
            | Error::Startup(_) => ErrorCode::UnknownError,
        }
    }

    /// Error event as sent back to the browser
    pub fn to_event(&self) -> Event {
        Event::error(self.code(), self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

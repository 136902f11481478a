//! Session error types.

use std::time::Duration;

use rover_peripherals::PeripheralError;
use rover_protocol::ProtocolError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::chassis::ChassisError;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Could not open the connection
    #[error("connect {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    /// Connected, but the hello message could not be delivered
    #[error("handshake: {0}")]
    Handshake(#[source] Box<SessionError>),

    /// Transport failure after the handshake
    #[error("websocket: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("connection closed by peer")]
    Closed,

    #[error(transparent)]
    Chassis(#[from] ChassisError),

    #[error(transparent)]
    Peripheral(#[from] PeripheralError),

    /// The command targets a peripheral that is not configured
    #[error("{0} disabled")]
    PeripheralUnavailable(&'static str),

    #[error("unsupported command type: {0}")]
    UnsupportedCommand(String),
}

impl SessionError {
    /// True if the session got as far as delivering its hello.
    ///
    /// The reconnect supervisor resets its backoff after such sessions.
    pub fn completed_handshake(&self) -> bool {
        !matches!(self, Self::Connect { .. } | Self::Handshake(_))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

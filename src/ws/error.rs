#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use crate::error::Kind;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error establishing the WebSocket connection
    Connect(tokio_tungstenite::tungstenite::Error),
    /// Error communicating over an established connection
    Connection(tokio_tungstenite::tungstenite::Error),
    /// WebSocket connection was closed by the peer or torn down locally
    ConnectionClosed,
    /// No reply arrived within the allotted time
    Timeout(std::time::Duration),
    /// Received a frame that cannot carry a reply
    UnexpectedFrame(String),
    /// The configured endpoint is not a usable WebSocket URL
    InvalidEndpoint(String),
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "WebSocket connect error: {e}"),
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Timeout(after) => write!(f, "no reply received within {after:?}"),
            Self::UnexpectedFrame(kind) => write!(f, "unexpected {kind} frame"),
            Self::InvalidEndpoint(reason) => write!(f, "invalid endpoint: {reason}"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connect(e) | Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        let kind = match &e {
            WsError::Timeout(_) => Kind::Timeout,
            WsError::InvalidEndpoint(_) => Kind::Validation,
            WsError::Connect(_)
            | WsError::Connection(_)
            | WsError::ConnectionClosed
            | WsError::UnexpectedFrame(_) => Kind::Connection,
        };
        crate::error::Error::with_source(kind, e)
    }
}

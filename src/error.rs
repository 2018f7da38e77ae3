//! Error types for WebSocket connections.
//!
//! Connection-level failures (handshake rejected, connection closed, no
//! transport available) sit next to the codec and transport errors that can
//! surface from a constructor or from `send`.

use thiserror::Error;

use crate::message::{CloseCode, CloseFrame};

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The opening handshake was rejected or did not complete.
    #[error("Connection error: {}", .status.map_or_else(|| "none".to_string(), |s| s.to_string()))]
    Connection {
        /// HTTP status code reported by the peer, when available.
        status: Option<u16>,
    },

    /// The connection is no longer open.
    #[error("Connection closed: {} {}", .code.as_u16(), .reason.as_deref().unwrap_or(""))]
    ConnectionClosed {
        /// Close code recorded for the connection.
        code: CloseCode,
        /// Close message recorded for the connection, if any.
        reason: Option<String>,
    },

    /// A transport could not be obtained or an option is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol violation detected by the codec.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Invalid UTF-8 in a text message or close reason.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// An incoming message grew past the configured maximum.
    #[error("Message too big: {size} bytes (max: {max})")]
    MessageTooBig {
        /// Bytes decoded before giving up.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake data exceeds configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Actual handshake size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Extension-related error.
    #[error("Extension error: {0}")]
    Extension(String),

    /// TLS setup failed.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Build the error reported once a connection has left the open state.
    ///
    /// A connection that went away without any close frame reports
    /// [`CloseCode::NoStatusReceived`].
    #[must_use]
    pub fn closed(frame: Option<&CloseFrame>) -> Self {
        match frame {
            Some(frame) => Error::ConnectionClosed {
                code: frame.code,
                reason: frame.reason.clone(),
            },
            None => Error::ConnectionClosed {
                code: CloseCode::NoStatusReceived,
                reason: None,
            },
        }
    }

    /// Returns `true` if this error reports a closed connection.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

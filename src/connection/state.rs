//! Connection lifecycle.

use crate::error::{Error, Result};
use crate::message::CloseFrame;

/// Lifecycle state of a connection.
///
/// `Handshaking → Open → Closing → Closed`. Only `Open` allows `send`,
/// `receive` and `close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// The opening handshake has not completed.
    #[default]
    Handshaking,
    /// Messages flow both ways.
    Open,
    /// A close frame has been sent or received; the background loop is
    /// finishing.
    Closing,
    /// The background loop has exited and the transport is shut down.
    Closed,
}

impl ConnectionState {
    /// Returns `true` only for `Open`.
    #[must_use]
    #[inline]
    pub const fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Returns `true` once the background loop has exited.
    #[must_use]
    #[inline]
    pub const fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Handshaking => write!(f, "Handshaking"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// State shared between a connection handle and its background loop.
#[derive(Debug, Default)]
pub(crate) struct Status {
    pub(crate) state: ConnectionState,
    /// First close frame sent or received; never replaced.
    pub(crate) close: Option<CloseFrame>,
}

impl Status {
    pub(crate) fn record(&mut self, close: CloseFrame) {
        if self.close.is_none() {
            self.close = Some(close);
        }
    }

    /// Move from `Open` to `Closing`. Later states are left alone.
    pub(crate) fn closing(&mut self) {
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Closing;
        }
    }

    pub(crate) fn closed_error(&self) -> Error {
        Error::closed(self.close.as_ref())
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.state.is_open() {
            Ok(())
        } else {
            Err(self.closed_error())
        }
    }
}

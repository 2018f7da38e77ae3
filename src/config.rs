//! Configuration and limits for WebSocket connections.

use std::time::Duration;

#[cfg(feature = "tls-rustls")]
use std::sync::Arc;

use crate::error::{Error, Result};

/// Bounds enforced by the protocol codec.
///
/// These limits prevent resource exhaustion from a misbehaving peer before a
/// single message is ever assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single frame payload in bytes.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of the opening handshake in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024, // 16 MB
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(max_frame_size: usize, max_handshake_size: usize) -> Self {
        Self {
            max_frame_size,
            max_handshake_size,
        }
    }

    /// Validate that frame size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<()> {
        if size > self.max_handshake_size {
            Err(Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// WebSocket connection configuration.
///
/// Shared by the blocking and async endpoints of both roles; options that only
/// make sense for one role are ignored by the other.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of bytes requested from the transport per read.
    ///
    /// Default: 4096
    pub receive_bytes: usize,

    /// Interval between keepalive pings.
    ///
    /// `None` disables the keepalive. A connection whose peer misses a pong
    /// for a whole interval is closed with `1008 policy violation`.
    /// Default: None
    pub ping_interval: Option<Duration>,

    /// Maximum size of an assembled incoming message in bytes.
    ///
    /// `None` disables the limit. Oversized messages close the connection
    /// with `1009 message too big`.
    /// Default: None
    pub max_message_size: Option<usize>,

    /// Subprotocols offered by a client, or accepted by a server.
    ///
    /// A client lists them in order of preference; a server picks the first
    /// client offer that also appears here.
    /// Default: empty
    pub subprotocols: Vec<String>,

    /// Additional request headers sent by a client during the handshake.
    ///
    /// Default: empty
    pub extra_headers: Vec<(String, String)>,

    /// Offer (client) or accept (server) permessage-deflate.
    ///
    /// Only effective with the `compression` feature.
    /// Default: true
    pub compression: bool,

    /// Codec limits.
    pub limits: Limits,

    /// TLS client configuration used for `wss://` URLs.
    ///
    /// `None` uses the bundled webpki roots.
    #[cfg(feature = "tls-rustls")]
    pub tls: Option<Arc<rustls::ClientConfig>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            receive_bytes: 4096,
            ping_interval: None,
            max_message_size: None,
            subprotocols: Vec::new(),
            extra_headers: Vec::new(),
            compression: true,
            limits: Limits::default(),
            #[cfg(feature = "tls-rustls")]
            tls: None,
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-read buffer size.
    #[must_use]
    pub const fn with_receive_bytes(mut self, size: usize) -> Self {
        self.receive_bytes = size;
        self
    }

    /// Enable the keepalive with the given ping interval.
    #[must_use]
    pub const fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    /// Limit the size of incoming messages.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Set the offered (client) or acceptable (server) subprotocols.
    #[must_use]
    pub fn with_subprotocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Add a request header sent by a client during the handshake.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Enable or disable permessage-deflate negotiation.
    #[must_use]
    pub const fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Use a custom TLS client configuration for `wss://` URLs.
    #[cfg(feature = "tls-rustls")]
    #[must_use]
    pub fn with_tls(mut self, tls: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Check the options before a connection is built from them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the receive buffer is empty, the ping
    /// interval is zero, or a header contains CR/LF characters.
    pub fn validate(&self) -> Result<()> {
        if self.receive_bytes == 0 {
            return Err(Error::Config("receive_bytes must be greater than 0".into()));
        }

        if self.ping_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(Error::Config("ping_interval must be greater than 0".into()));
        }

        for (name, value) in &self.extra_headers {
            if name.contains(['\r', '\n', ':']) || value.contains(['\r', '\n']) {
                return Err(Error::Config(format!("invalid header: {name}")));
            }
        }

        for protocol in &self.subprotocols {
            if protocol.is_empty() || protocol.contains(['\r', '\n', ',']) {
                return Err(Error::Config(format!("invalid subprotocol: {protocol:?}")));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_default() {
        let limits = Limits::default();
        assert_eq!(limits.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(limits.max_handshake_size, 8192);
    }

    #[test]
    fn test_limits_check_handshake_size() {
        let limits = Limits::default();
        assert!(limits.check_handshake_size(1024).is_ok());
        assert!(limits.check_handshake_size(10000).is_err());
    }

    #[test]
    fn test_limits_check_frame_size() {
        let limits = Limits::new(1024, 512);
        assert!(limits.check_frame_size(1024).is_ok());
        assert!(matches!(
            limits.check_frame_size(1025),
            Err(Error::FrameTooLarge { size: 1025, max: 1024 })
        ));
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.receive_bytes, 4096);
        assert!(config.ping_interval.is_none());
        assert!(config.max_message_size.is_none());
        assert!(config.subprotocols.is_empty());
        assert!(config.compression);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_receive_bytes(1024)
            .with_ping_interval(Duration::from_secs(25))
            .with_max_message_size(5)
            .with_subprotocols(["foo", "bar"])
            .with_header("X-Token", "abc")
            .with_compression(false);

        assert_eq!(config.receive_bytes, 1024);
        assert_eq!(config.ping_interval, Some(Duration::from_secs(25)));
        assert_eq!(config.max_message_size, Some(5));
        assert_eq!(config.subprotocols, vec!["foo", "bar"]);
        assert_eq!(config.extra_headers, vec![("X-Token".into(), "abc".into())]);
        assert!(!config.compression);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = Config::new().with_ping_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_receive_bytes() {
        let config = Config::new().with_receive_bytes(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_header_injection() {
        let config = Config::new().with_header("X-Evil", "a\r\nHost: evil");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_subprotocol() {
        let config = Config::new().with_subprotocols(["a,b"]);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}

//! Client URL handling.

use http::Uri;

use crate::error::{Error, Result};

/// Where a client connects to, parsed from a `ws://` or `wss://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// TLS required (`wss`/`https`).
    pub secure: bool,
    /// Host name or address, without IPv6 brackets.
    pub host: String,
    /// TCP port, defaulted from the scheme.
    pub port: u16,
    /// Request target including the query string.
    pub path: String,
}

impl Target {
    /// Parse a client URL.
    ///
    /// `http` and `https` are accepted as aliases of `ws` and `wss`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unparsable URL, a missing host or an
    /// unsupported scheme.
    pub fn parse(url: &str) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|err| Error::Config(format!("invalid URL {url:?}: {err}")))?;

        let secure = match uri.scheme_str() {
            Some("ws" | "http") => false,
            Some("wss" | "https") => true,
            Some(other) => return Err(Error::Config(format!("unsupported scheme: {other}"))),
            None => return Err(Error::Config(format!("URL without scheme: {url:?}"))),
        };
        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::Config(format!("URL without host: {url:?}")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']').to_owned();
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });
        let path = uri
            .path_and_query()
            .map(http::uri::PathAndQuery::as_str)
            .filter(|path| !path.is_empty())
            .unwrap_or("/")
            .to_owned();

        Ok(Self {
            secure,
            host,
            port,
            path,
        })
    }

    /// Value for the `Host` header; the port is omitted when it is the
    /// scheme's default.
    #[must_use]
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// `host:port` pair suitable for `TcpStream::connect`.
    #[must_use]
    pub fn address(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

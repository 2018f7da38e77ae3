//! Opening handshake (RFC 6455 Section 4).
//!
//! Builds and parses the HTTP/1.1 Upgrade request and response heads. The
//! codec feeds complete heads in here; locating the end of a head in a byte
//! stream is done with [`find_head_end`].

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Return the length of the HTTP head at the front of `buf`, including the
/// blank line, or `None` if the head is not complete yet.
#[must_use]
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
        .map(|pos| pos + HEAD_TERMINATOR.len())
}

/// Parse header lines into a map keyed by lowercase name.
///
/// Repeated headers are joined with `", "`, except for the ones listed in
/// `unique`, which must appear at most once.
fn parse_headers<'a, I>(lines: I, unique: &[&str]) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: HashMap<String, String> = HashMap::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::InvalidHandshake(format!("malformed header line: {line}")));
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();

        match headers.get_mut(&name) {
            Some(_) if unique.contains(&name.as_str()) => {
                return Err(Error::InvalidHandshake(format!("duplicate header: {name}")));
            }
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                headers.insert(name, value.to_owned());
            }
        }
    }

    Ok(headers)
}

fn split_list(value: Option<&String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn require<'a>(headers: &'a HashMap<String, String>, name: &str) -> Result<&'a String> {
    headers
        .get(name)
        .ok_or_else(|| Error::InvalidHandshake(format!("missing {name} header")))
}

fn check_upgrade_headers(headers: &HashMap<String, String>) -> Result<()> {
    let upgrade = require(headers, "upgrade")?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::InvalidHandshake(format!("invalid Upgrade header: {upgrade}")));
    }
    let connection = require(headers, "connection")?;
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(Error::InvalidHandshake(format!(
            "invalid Connection header: {connection}"
        )));
    }
    Ok(())
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use simple_websocket::protocol::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Generate a fresh Sec-WebSocket-Key: 16 random bytes, base64 encoded.
///
/// # Errors
///
/// Returns [`Error::Io`] if the system random source fails.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(|e| Error::Io(e.to_string()))?;
    Ok(BASE64.encode(nonce))
}

/// Pick the first subprotocol offered by the client that the server accepts.
///
/// The client's order is the order of preference. No overlap is not an
/// error; the connection simply proceeds without a subprotocol.
#[must_use]
pub fn select_subprotocol(offered: &[String], acceptable: &[String]) -> Option<String> {
    offered
        .iter()
        .find(|protocol| acceptable.contains(protocol))
        .cloned()
}

/// Client upgrade request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandshakeRequest {
    /// Request target, including any query string.
    pub path: String,
    /// The Host header value.
    pub host: String,
    /// The Sec-WebSocket-Key header value.
    pub key: String,
    /// The Sec-WebSocket-Version (13).
    pub version: u8,
    /// Offered subprotocols, in order of preference.
    pub protocols: Vec<String>,
    /// Offered extensions, one entry per comma-separated item.
    pub extensions: Vec<String>,
    /// Any other headers, sent verbatim.
    pub headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// Parse an upgrade request head.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the head is not UTF-8, the
    /// request line is not `GET <target> HTTP/1.1`, a required header is
    /// missing or malformed, or a security-relevant header is repeated.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("request is not UTF-8".into()))?;
        let mut lines = text.split("\r\n");

        let request_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| Error::InvalidHandshake("empty request".into()))?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method, path, version] = parts.as_slice() else {
            return Err(Error::InvalidHandshake(format!(
                "invalid request line: {request_line}"
            )));
        };
        if *method != "GET" {
            return Err(Error::InvalidHandshake(format!("expected GET, got {method}")));
        }
        if *version != "HTTP/1.1" {
            return Err(Error::InvalidHandshake(format!("expected HTTP/1.1, got {version}")));
        }

        let headers = parse_headers(
            lines,
            &["host", "upgrade", "sec-websocket-key", "sec-websocket-version"],
        )?;
        check_upgrade_headers(&headers)?;

        let version = require(&headers, "sec-websocket-version")?;
        let version = version
            .parse()
            .map_err(|_| Error::InvalidHandshake(format!("invalid version: {version}")))?;

        Ok(Self {
            path: (*path).to_owned(),
            host: require(&headers, "host")?.clone(),
            key: require(&headers, "sec-websocket-key")?.clone(),
            version,
            protocols: split_list(headers.get("sec-websocket-protocol")),
            extensions: split_list(headers.get("sec-websocket-extensions")),
            headers: Vec::new(),
        })
    }

    /// Check the parsed request against RFC 6455 Section 4.2.1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the version is not 13, the key
    /// does not decode to 16 bytes, or the Host header is empty.
    pub fn validate(&self) -> Result<()> {
        if self.version != 13 {
            return Err(Error::InvalidHandshake(format!(
                "unsupported version {} (expected 13)",
                self.version
            )));
        }

        match BASE64.decode(&self.key) {
            Ok(decoded) if decoded.len() == 16 => {}
            Ok(decoded) => {
                return Err(Error::InvalidHandshake(format!(
                    "Sec-WebSocket-Key must be 16 bytes, got {}",
                    decoded.len()
                )));
            }
            Err(_) => {
                return Err(Error::InvalidHandshake(
                    "Sec-WebSocket-Key is not valid base64".into(),
                ));
            }
        }

        if self.host.is_empty() {
            return Err(Error::InvalidHandshake("empty Host header".into()));
        }

        Ok(())
    }

    /// Serialize the request head.
    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut head = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\nSec-WebSocket-Version: {}\r\n",
            self.path, self.host, self.key, self.version
        );
        if !self.protocols.is_empty() {
            head.push_str(&format!(
                "Sec-WebSocket-Protocol: {}\r\n",
                self.protocols.join(", ")
            ));
        }
        if !self.extensions.is_empty() {
            head.push_str(&format!(
                "Sec-WebSocket-Extensions: {}\r\n",
                self.extensions.join(", ")
            ));
        }
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");
        buf.extend_from_slice(head.as_bytes());
    }
}

/// Server upgrade response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// HTTP status code. Anything but 101 is a rejection.
    pub status: u16,
    /// The Sec-WebSocket-Accept value (101 only).
    pub accept: Option<String>,
    /// The selected subprotocol.
    pub protocol: Option<String>,
    /// Accepted extensions.
    pub extensions: Vec<String>,
}

impl HandshakeResponse {
    /// Build the `101 Switching Protocols` answer to `request`.
    #[must_use]
    pub fn accept(
        request: &HandshakeRequest,
        protocol: Option<String>,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            status: 101,
            accept: Some(compute_accept_key(&request.key)),
            protocol,
            extensions,
        }
    }

    /// Build a plain HTTP rejection.
    #[must_use]
    pub fn reject(status: u16) -> Self {
        Self {
            status,
            accept: None,
            protocol: None,
            extensions: Vec::new(),
        }
    }

    /// Parse a response head.
    ///
    /// A non-101 status is returned as-is so the caller can report it; only a
    /// 101 response has its upgrade headers checked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] for a malformed status line or a
    /// 101 response with missing or invalid upgrade headers.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("response is not UTF-8".into()))?;
        let mut lines = text.split("\r\n");

        let status_line = lines
            .next()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| Error::InvalidHandshake("empty response".into()))?;
        let mut parts = status_line.splitn(3, ' ');
        let status = match (parts.next(), parts.next()) {
            (Some(version), Some(code)) if version.starts_with("HTTP/") => {
                code.parse::<u16>().map_err(|_| {
                    Error::InvalidHandshake(format!("invalid status line: {status_line}"))
                })?
            }
            _ => {
                return Err(Error::InvalidHandshake(format!(
                    "invalid status line: {status_line}"
                )));
            }
        };

        if status != 101 {
            return Ok(Self::reject(status));
        }

        let headers = parse_headers(lines, &["upgrade", "sec-websocket-accept"])?;
        check_upgrade_headers(&headers)?;

        Ok(Self {
            status,
            accept: Some(require(&headers, "sec-websocket-accept")?.clone()),
            protocol: headers.get("sec-websocket-protocol").cloned(),
            extensions: split_list(headers.get("sec-websocket-extensions")),
        })
    }

    /// Serialize the response head.
    pub fn write(&self, buf: &mut Vec<u8>) {
        if self.status != 101 {
            let reason = match self.status {
                400 => "Bad Request",
                403 => "Forbidden",
                426 => "Upgrade Required",
                500 => "Internal Server Error",
                _ => "Error",
            };
            buf.extend_from_slice(
                format!(
                    "HTTP/1.1 {} {reason}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    self.status
                )
                .as_bytes(),
            );
            return;
        }

        let mut head = String::from(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n",
        );
        if let Some(accept) = &self.accept {
            head.push_str(&format!("Sec-WebSocket-Accept: {accept}\r\n"));
        }
        if let Some(protocol) = &self.protocol {
            head.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
        }
        if !self.extensions.is_empty() {
            head.push_str(&format!(
                "Sec-WebSocket-Extensions: {}\r\n",
                self.extensions.join(", ")
            ));
        }
        head.push_str("\r\n");
        buf.extend_from_slice(head.as_bytes());
    }
}

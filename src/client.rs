//! Client endpoints.

use std::io::Write;
use std::net::TcpStream;

use tracing::debug;

use crate::codec::{Codec, Outgoing, WsCodec};
use crate::config::Config;
use crate::connection::{Connection, Role};
#[cfg(not(feature = "tls-rustls"))]
use crate::error::Error;
use crate::error::Result;
#[cfg(feature = "compression")]
use crate::protocol::deflate;
use crate::protocol::HandshakeRequest;
use crate::protocol::handshake::generate_key;
use crate::target::Target;
use crate::transport::Socket;

#[cfg(feature = "async-tokio")]
use crate::connection::AsyncConnection;
#[cfg(feature = "async-tokio")]
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Upgrade request for `target` carrying the configured offers.
fn upgrade_request(target: &Target, config: &Config) -> Result<HandshakeRequest> {
    #[allow(unused_mut)]
    let mut extensions = Vec::new();
    #[cfg(feature = "compression")]
    if config.compression {
        extensions.push(deflate::NEGOTIATED.to_owned());
    }

    Ok(HandshakeRequest {
        path: target.path.clone(),
        host: target.host_header(),
        key: generate_key()?,
        version: 13,
        protocols: config.subprotocols.clone(),
        extensions,
        headers: config.extra_headers.clone(),
    })
}

/// Blocking WebSocket client.
///
/// ```no_run
/// use simple_websocket::{Client, Config};
///
/// let ws = Client::connect("ws://localhost:5000/echo", &Config::default())?;
/// ws.send("hello")?;
/// let reply = ws.receive(None)?;
/// ws.close(None, None)?;
/// # Ok::<(), simple_websocket::Error>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Client;

impl Client {
    /// Connect to `url` and complete the opening handshake.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for an invalid URL or configuration, or a
    ///   `wss://` URL without the `tls-rustls` feature
    /// - [`Error::Io`] if the TCP connection fails
    /// - [`Error::Tls`] if the TLS handshake fails
    /// - [`Error::Connection`] if the server rejects the upgrade
    pub fn connect(url: &str, config: &Config) -> Result<Connection> {
        config.validate()?;
        let target = Target::parse(url)?;
        #[cfg(not(feature = "tls-rustls"))]
        if target.secure {
            return Err(Error::Config("wss:// requires the tls-rustls feature".into()));
        }

        let stream = TcpStream::connect(target.address())?;
        debug!(host = %target.host, port = target.port, secure = target.secure, "connected");

        #[cfg(feature = "tls-rustls")]
        if target.secure {
            let tls = config
                .tls
                .clone()
                .unwrap_or_else(crate::tls::client_config_with_webpki_roots);
            let socket = crate::tls::TlsSocket::connect(tls, &target.host, stream)?;
            return Self::upgrade(Box::new(socket), &target, config);
        }

        Self::upgrade(Box::new(stream), &target, config)
    }

    fn upgrade(
        mut socket: Box<dyn Socket>,
        target: &Target,
        config: &Config,
    ) -> Result<Connection> {
        let mut codec = WsCodec::new(Role::Client, config.limits.clone())?
            .with_max_message_size(config.max_message_size);
        let request = upgrade_request(target, config)?;
        socket.write_all(&codec.encode(Outgoing::Request(&request))?)?;
        socket.flush()?;

        Connection::open(socket, codec, config, None)
    }
}

/// Async WebSocket client on tokio.
///
/// `wss://` URLs are supported with the `tls-rustls` feature, using
/// [`Config::tls`] or the bundled webpki roots.
#[cfg(feature = "async-tokio")]
#[derive(Debug, Clone, Copy)]
pub struct AsyncClient;

#[cfg(feature = "async-tokio")]
impl AsyncClient {
    /// Connect to `url` and complete the opening handshake.
    ///
    /// # Errors
    ///
    /// Same as [`Client::connect`], plus [`Error::Tls`] when the TLS
    /// handshake fails.
    pub async fn connect(url: &str, config: &Config) -> Result<AsyncConnection> {
        config.validate()?;
        let target = Target::parse(url)?;
        let stream = tokio::net::TcpStream::connect(target.address()).await?;
        debug!(host = %target.host, port = target.port, secure = target.secure, "connected");

        if target.secure {
            #[cfg(feature = "tls-rustls")]
            {
                let tls = config
                    .tls
                    .clone()
                    .unwrap_or_else(crate::tls::client_config_with_webpki_roots);
                let stream = crate::tls::TlsConnector::new(tls)
                    .connect(&target.host, stream)
                    .await?;
                return Self::upgrade(stream, &target, config).await;
            }
            #[cfg(not(feature = "tls-rustls"))]
            return Err(Error::Config("wss:// requires the tls-rustls feature".into()));
        }

        Self::upgrade(stream, &target, config).await
    }

    async fn upgrade<S>(mut stream: S, target: &Target, config: &Config) -> Result<AsyncConnection>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut codec = WsCodec::new(Role::Client, config.limits.clone())?
            .with_max_message_size(config.max_message_size);
        let request = upgrade_request(target, config)?;
        stream
            .write_all(&codec.encode(Outgoing::Request(&request))?)
            .await?;
        AsyncConnection::open(stream, codec, config, None).await
    }
}

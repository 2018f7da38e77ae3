//! Server endpoints.

use crate::codec::WsCodec;
use crate::config::Config;
use crate::connection::{Connection, Role};
use crate::error::Result;
use crate::transport::{Extracted, HostSocket, Socket};

#[cfg(feature = "async-tokio")]
use crate::connection::AsyncConnection;
#[cfg(feature = "async-tokio")]
use tokio::io::{AsyncRead, AsyncWrite};

/// Blocking WebSocket server endpoint.
///
/// ```no_run
/// use std::net::TcpListener;
/// use simple_websocket::{Config, Server};
///
/// let listener = TcpListener::bind("127.0.0.1:5000")?;
/// for stream in listener.incoming() {
///     let ws = Server::accept(stream?, &Config::default())?;
///     while let Ok(Some(message)) = ws.receive(None) {
///         ws.send(message)?;
///     }
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Server;

impl Server {
    /// Take the connection out of `host` and answer its upgrade request.
    ///
    /// The acceptable subprotocols come from [`Config::subprotocols`].
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if no socket can be
    ///   obtained from `host` or the configuration is invalid
    /// - [`Error::Connection`](crate::Error::Connection) if the upgrade
    ///   request is malformed or the peer goes away first
    pub fn accept<H>(host: H, config: &Config) -> Result<Connection>
    where
        H: HostSocket,
        H::Stream: Socket,
    {
        config.validate()?;
        let Extracted { head, stream } = host.extract()?;
        let codec = WsCodec::new(Role::Server, config.limits.clone())?
            .with_max_message_size(config.max_message_size);
        Connection::open(Box::new(stream), codec, config, head)
    }
}

/// Async WebSocket server endpoint on tokio.
#[cfg(feature = "async-tokio")]
#[derive(Debug, Clone, Copy)]
pub struct AsyncServer;

#[cfg(feature = "async-tokio")]
impl AsyncServer {
    /// Take the connection out of `host` and answer its upgrade request.
    ///
    /// # Errors
    ///
    /// Same as [`Server::accept`].
    pub async fn accept<H>(host: H, config: &Config) -> Result<AsyncConnection>
    where
        H: HostSocket,
        H::Stream: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        let Extracted { head, stream } = host.extract()?;
        let codec = WsCodec::new(Role::Server, config.limits.clone())?
            .with_max_message_size(config.max_message_size);
        AsyncConnection::open(stream, codec, config, head).await
    }
}

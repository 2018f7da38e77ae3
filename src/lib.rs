//! # simple-websocket
//!
//! WebSocket connections with a small `send` / `receive` / `close` API, for
//! clients and servers, in blocking and async flavors.
//!
//! Each connection runs a background loop (a thread, or a tokio task) that
//! reads from the transport, answers pings, reassembles fragmented messages,
//! enforces the optional message size limit, drives the optional ping/pong
//! keepalive and completes the closing handshake. The application only sees
//! complete messages.
//!
//! ## Features
//!
//! - **async-tokio** (default): [`AsyncClient`], [`AsyncServer`] and
//!   [`AsyncConnection`]
//! - **compression**: permessage-deflate negotiation
//! - **tls-rustls**: `wss://` URLs for [`AsyncClient`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use simple_websocket::{Client, Config};
//!
//! let config = Config::new().with_ping_interval(Duration::from_secs(25));
//! let ws = Client::connect("ws://localhost:5000/echo", &config)?;
//! ws.send("hello")?;
//! if let Some(message) = ws.receive(Some(Duration::from_secs(5)))? {
//!     println!("{message:?}");
//! }
//! ws.close(None, None)?;
//! # Ok::<(), simple_websocket::Error>(())
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod server;
pub mod target;
pub mod transport;

#[cfg(feature = "tls-rustls")]
pub mod tls;

pub use client::Client;
#[cfg(feature = "async-tokio")]
pub use client::AsyncClient;
pub use codec::{Codec, Event, Outgoing, WsCodec};
pub use config::{Config, Limits};
pub use connection::{Connection, ConnectionState, Role};
#[cfg(feature = "async-tokio")]
pub use connection::AsyncConnection;
pub use error::{Error, Result};
pub use message::{CloseCode, CloseFrame, Message};
#[cfg(feature = "async-tokio")]
pub use server::AsyncServer;
pub use server::Server;
pub use transport::{Extracted, HostSocket, Socket};

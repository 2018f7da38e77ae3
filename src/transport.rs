//! Byte transports and host socket extraction.
//!
//! The blocking engine drives any [`Socket`]; the async engine any tokio
//! `AsyncRead + AsyncWrite` stream. [`HostSocket`] lets a server accept
//! either a raw connection or a request object a hosting HTTP server has
//! already parsed.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::error::{Error, Result};

/// A blocking duplex byte stream the background thread can own.
///
/// `try_clone` must return a handle to the same underlying connection so the
/// reader, the writer and the shutdown handle observe each other.
pub trait Socket: Read + Write + Send + Sync + 'static {
    /// Another handle to the same connection.
    fn try_clone(&self) -> io::Result<Box<dyn Socket>>;

    /// Bound the next reads; `None` blocks indefinitely.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Shut both directions down, waking any blocked reader.
    fn shutdown(&self) -> io::Result<()>;
}

impl Socket for TcpStream {
    fn try_clone(&self) -> io::Result<Box<dyn Socket>> {
        Ok(Box::new(TcpStream::try_clone(self)?))
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(unix)]
impl Socket for std::os::unix::net::UnixStream {
    fn try_clone(&self) -> io::Result<Box<dyn Socket>> {
        Ok(Box::new(std::os::unix::net::UnixStream::try_clone(self)?))
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }
}

/// Stream extracted from a host, plus any request bytes the host already
/// consumed from it.
#[derive(Debug)]
pub struct Extracted<S> {
    /// Upgrade request head to replay into the codec before reading.
    pub head: Option<Vec<u8>>,
    /// The raw connection.
    pub stream: S,
}

/// Something a server endpoint can obtain a raw connection from.
pub trait HostSocket {
    /// The connection type handed to the engine.
    type Stream;

    /// Take the raw connection out of the host object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the host does not expose a socket.
    fn extract(self) -> Result<Extracted<Self::Stream>>;
}

macro_rules! raw_host_socket {
    ($($(#[$attr:meta])* $ty:ty),* $(,)?) => {
        $(
            $(#[$attr])*
            impl HostSocket for $ty {
                type Stream = $ty;

                fn extract(self) -> Result<Extracted<Self::Stream>> {
                    Ok(Extracted { head: None, stream: self })
                }
            }
        )*
    };
}

raw_host_socket!(
    TcpStream,
    #[cfg(unix)]
    std::os::unix::net::UnixStream,
    #[cfg(feature = "async-tokio")]
    tokio::net::TcpStream,
    #[cfg(all(unix, feature = "async-tokio"))]
    tokio::net::UnixStream,
);

/// A request a hosting HTTP server already parsed, carrying the upgraded
/// connection in its body. `None` means the host could not hand it over.
impl<S> HostSocket for http::Request<Option<S>> {
    type Stream = S;

    fn extract(self) -> Result<Extracted<S>> {
        let (parts, stream) = self.into_parts();
        let stream =
            stream.ok_or_else(|| Error::Config("cannot obtain socket from request".into()))?;

        let target = parts
            .uri
            .path_and_query()
            .map_or("/", http::uri::PathAndQuery::as_str);
        let mut head = format!("GET {target} HTTP/1.1\r\n").into_bytes();
        for (name, value) in &parts.headers {
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");

        Ok(Extracted {
            head: Some(head),
            stream,
        })
    }
}

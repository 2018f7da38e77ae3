//! Client-side TLS over a blocking `TcpStream`.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::Socket;

/// Ciphertext read from the socket per call.
const READ_CHUNK: usize = 16 * 1024;

struct Session {
    conn: ClientConnection,
    /// Ciphertext read from the socket but not yet handed to rustls.
    pending: Vec<u8>,
}

impl Session {
    fn flush_tls(&mut self, tcp: &TcpStream) -> io::Result<()> {
        let mut tcp = tcp;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut tcp)?;
        }
        Ok(())
    }

    /// Hand buffered ciphertext to rustls until it is consumed or rustls
    /// has plaintext to give back.
    fn feed(&mut self, tcp: &TcpStream) -> io::Result<()> {
        let mut input = self.pending.as_slice();
        let consumed = self.conn.read_tls(&mut input)?;
        self.pending.drain(..consumed);
        self.conn
            .process_new_packets()
            .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
        self.flush_tls(tcp)
    }
}

/// A TLS client session usable as a blocking [`Socket`].
///
/// Clones share one session. Socket reads happen outside the session lock,
/// so a thread blocked reading never holds up a writer.
pub struct TlsSocket {
    session: Arc<Mutex<Session>>,
    tcp: TcpStream,
}

impl TlsSocket {
    /// Run the TLS handshake for `domain` over `tcp`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if `domain` is not a valid server name or the
    /// handshake fails.
    pub fn connect(config: Arc<ClientConfig>, domain: &str, tcp: TcpStream) -> Result<Self> {
        let server_name = ServerName::try_from(domain.to_owned())
            .map_err(|_| Error::Tls(format!("invalid DNS name: {domain}")))?;
        let mut conn =
            ClientConnection::new(config, server_name).map_err(|err| Error::Tls(err.to_string()))?;

        let mut io = &tcp;
        while conn.is_handshaking() {
            conn.complete_io(&mut io)
                .map_err(|err| Error::Tls(err.to_string()))?;
        }
        debug!(domain, "TLS session established");

        Ok(Self {
            session: Arc::new(Mutex::new(Session {
                conn,
                pending: Vec::new(),
            })),
            tcp,
        })
    }
}

impl Read for TlsSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut raw = [0u8; READ_CHUNK];
        loop {
            {
                let mut session = self.session.lock();
                match session.conn.reader().read(buf) {
                    Ok(n) => return Ok(n),
                    Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                    Err(err) => return Err(err),
                }
                if !session.pending.is_empty() {
                    session.feed(&self.tcp)?;
                    continue;
                }
            }

            // Read timeouts surface to the caller unchanged.
            let n = self.tcp.read(&mut raw)?;
            if n == 0 {
                return Ok(0);
            }
            self.session.lock().pending.extend_from_slice(&raw[..n]);
        }
    }
}

impl Write for TlsSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut session = self.session.lock();
        let n = session.conn.writer().write(buf)?;
        session.flush_tls(&self.tcp)?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.session.lock().flush_tls(&self.tcp)?;
        (&self.tcp).flush()
    }
}

impl Socket for TlsSocket {
    fn try_clone(&self) -> io::Result<Box<dyn Socket>> {
        Ok(Box::new(Self {
            session: Arc::clone(&self.session),
            tcp: self.tcp.try_clone()?,
        }))
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.tcp.set_read_timeout(timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        {
            let mut session = self.session.lock();
            session.conn.send_close_notify();
            let _ = session.flush_tls(&self.tcp);
        }
        self.tcp.shutdown(Shutdown::Both)
    }
}

impl std::fmt::Debug for TlsSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSocket")
            .field("peer", &self.tcp.peer_addr().ok())
            .finish_non_exhaustive()
    }
}

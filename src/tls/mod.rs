//! TLS for `wss://` client connections, backed by rustls.
//!
//! [`TlsConnector`] wraps tokio streams for the async client; [`TlsSocket`]
//! wraps a blocking `TcpStream` for the thread engine.

mod blocking;

pub use blocking::TlsSocket;

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use crate::error::{Error, Result};

/// Client configuration trusting the bundled webpki roots.
#[must_use]
pub fn client_config_with_webpki_roots() -> Arc<ClientConfig> {
    let root_store = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    Arc::new(config)
}

/// Wraps a connected stream in client-side TLS.
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Create a connector from a rustls client configuration.
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            inner: tokio_rustls::TlsConnector::from(config),
        }
    }

    /// Run the TLS handshake for `domain` over `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if `domain` is not a valid server name or the
    /// handshake fails.
    pub async fn connect<S>(&self, domain: &str, stream: S) -> Result<TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = ServerName::try_from(domain.to_owned())
            .map_err(|_| Error::Tls(format!("invalid DNS name: {domain}")))?;

        let stream = self
            .inner
            .connect(server_name, stream)
            .await
            .map_err(|err| Error::Tls(err.to_string()))?;
        debug!(domain, "TLS session established");
        Ok(stream)
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector").finish_non_exhaustive()
    }
}

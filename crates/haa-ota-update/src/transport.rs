//! Network transport seam.
//!
//! The fetch client talks to a [`Transport`] that opens byte-stream
//! [`Connection`]s. [`TcpTransport`] is the production implementation over
//! tokio TCP, with TLS through `tokio-rustls` and the Mozilla root set.

use std::sync::Arc;

use async_trait::async_trait;
use haa_ota_errors::NetworkError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use crate::http::Endpoint;

/// An open byte stream to a server.
#[async_trait]
pub trait Connection: Send {
    /// Write all of `data`.
    async fn send(&mut self, data: &[u8]) -> Result<(), NetworkError>;

    /// Read into `buf`, returning the count; 0 means the peer closed.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetworkError>;

    /// Shut the stream down.
    async fn close(&mut self) -> Result<(), NetworkError>;
}

/// Opens connections to endpoints.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `endpoint`, completing the TLS handshake when required.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, NetworkError>;
}

/// tokio TCP transport with optional TLS.
#[derive(Clone)]
pub struct TcpTransport {
    tls: TlsConnector,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport").finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// Transport trusting the bundled web PKI roots.
    ///
    /// # Errors
    ///
    /// [`NetworkError::Tls`] when the TLS configuration cannot be built.
    pub fn new() -> Result<Self, NetworkError> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| NetworkError::Tls {
                host: String::new(),
                reason: e.to_string(),
            })?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self {
            tls: TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, NetworkError> {
        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| NetworkError::connect(&endpoint.host, endpoint.port, e.to_string()))?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle");
        }

        if !endpoint.tls {
            debug!(%endpoint, "connected");
            return Ok(Box::new(StreamConnection { stream: tcp }));
        }

        let name = ServerName::try_from(endpoint.host.clone()).map_err(|e| NetworkError::Tls {
            host: endpoint.host.clone(),
            reason: e.to_string(),
        })?;
        let stream = self
            .tls
            .connect(name, tcp)
            .await
            .map_err(|e| NetworkError::Tls {
                host: endpoint.host.clone(),
                reason: e.to_string(),
            })?;
        debug!(%endpoint, "TLS session established");
        Ok(Box::new(StreamConnection { stream }))
    }
}

struct StreamConnection<S> {
    stream: S,
}

#[async_trait]
impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> Result<(), NetworkError> {
        self.stream
            .write_all(data)
            .await
            .map_err(|e| NetworkError::Send(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| NetworkError::Send(e.to_string()))
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetworkError> {
        self.stream
            .read(buf)
            .await
            .map_err(|e| NetworkError::Receive(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), NetworkError> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| NetworkError::Send(e.to_string()))
    }
}

// ABOUTME: Byte-stream transport seam beneath the HTTP layer.
// ABOUTME: Opens Unix, TCP, and rustls-backed TLS streams to an engine endpoint.

use super::endpoint::Endpoint;
use super::error::{Error, Result};
use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_rustls::TlsConnector;

/// Anything the HTTP layer can run over.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedIo = Box<dyn Io>;

/// Opens raw byte streams to an engine endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, endpoint: &Endpoint) -> Result<BoxedIo>;
}

/// PEM material for TLS endpoints.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    /// CA bundle used to verify the engine.
    pub ca: PathBuf,
    /// Client certificate chain, for engines that require client auth.
    pub cert: Option<PathBuf>,
    /// Private key matching `cert`.
    pub key: Option<PathBuf>,
}

/// Default transport: Unix sockets, plain TCP, and TLS over TCP.
pub struct SocketTransport {
    tls: Option<TlsConnector>,
}

impl SocketTransport {
    pub fn new() -> Self {
        Self { tls: None }
    }

    /// Build a transport able to reach TLS endpoints.
    pub fn with_tls(material: &TlsMaterial) -> Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut roots = rustls::RootCertStore::empty();
        for cert in load_certs(&material.ca)? {
            roots
                .add(cert)
                .map_err(|e| Error::Connection(format!("invalid CA certificate: {e}")))?;
        }

        let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
        let config = match (&material.cert, &material.key) {
            (Some(cert), Some(key)) => builder
                .with_client_auth_cert(load_certs(cert)?, load_key(key)?)
                .map_err(|e| Error::Connection(format!("invalid client certificate: {e}")))?,
            _ => builder.with_no_client_auth(),
        };

        Ok(Self {
            tls: Some(TlsConnector::from(Arc::new(config))),
        })
    }
}

impl Default for SocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<BoxedIo> {
        match endpoint {
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(|e| {
                    Error::Connection(format!("failed to connect to {}: {e}", path.display()))
                })?;
                Ok(Box::new(stream))
            }
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| Error::Connection(format!("failed to connect to {endpoint}: {e}")))?;
                stream.set_nodelay(true).ok();
                Ok(Box::new(stream))
            }
            Endpoint::Tls { host, port } => {
                let connector = self.tls.as_ref().ok_or_else(|| {
                    Error::Connection(format!("{endpoint} requires TLS material"))
                })?;
                let tcp = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| Error::Connection(format!("failed to connect to {endpoint}: {e}")))?;
                tcp.set_nodelay(true).ok();

                let server_name = server_name(host)?;
                let stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| Error::Connection(format!("TLS handshake failed: {e}")))?;
                Ok(Box::new(stream))
            }
        }
    }
}

fn server_name(host: &str) -> Result<ServerName<'static>> {
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return Ok(ServerName::IpAddress(ip.into()));
    }
    ServerName::try_from(host.to_string())
        .map_err(|e| Error::Connection(format!("invalid TLS server name {host}: {e}")))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Connection(format!("failed to open {}: {e}", path.display())))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Connection(format!("failed to parse {}: {e}", path.display())))
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::Connection(format!("failed to open {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| Error::Connection(format!("failed to parse {}: {e}", path.display())))?
        .ok_or_else(|| Error::Connection(format!("no private key in {}", path.display())))
}

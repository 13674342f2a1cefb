// ABOUTME: Engine endpoint addresses and their parsing.
// ABOUTME: Accepts unix://, tcp://, http://, and https:// forms of DOCKER_HOST.

use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";
pub const DEFAULT_PLAIN_PORT: u16 = 2375;
pub const DEFAULT_TLS_PORT: u16 = 2376;

/// Where the engine listens. Doubles as the connection pool key, so two
/// endpoints only share connections when address and protocol both match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
    Tls { host: String, port: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("endpoint cannot be empty")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("hostname cannot be empty")]
    MissingHost,
}

impl Endpoint {
    /// Parse `unix:///path`, `tcp://host[:port]`, `http://...`, `https://...`.
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EndpointError::Empty);
        }

        let (scheme, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None if s.starts_with('/') => return Ok(Endpoint::Unix(PathBuf::from(s))),
            None => ("tcp".to_string(), s),
        };

        match scheme.as_str() {
            "unix" => {
                if rest.is_empty() {
                    return Err(EndpointError::Empty);
                }
                Ok(Endpoint::Unix(PathBuf::from(rest)))
            }
            "tcp" | "http" => {
                let (host, port) = split_host_port(rest, DEFAULT_PLAIN_PORT)?;
                Ok(Endpoint::Tcp { host, port })
            }
            "https" => {
                let (host, port) = split_host_port(rest, DEFAULT_TLS_PORT)?;
                Ok(Endpoint::Tls { host, port })
            }
            other => Err(EndpointError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Endpoint::Tls { .. })
    }

    /// Upgrade a plaintext TCP endpoint to TLS, keeping an explicit port.
    pub fn into_tls(self) -> Self {
        match self {
            Endpoint::Tcp { host, port } => Endpoint::Tls { host, port },
            other => other,
        }
    }

    /// Value for the HTTP `Host` header.
    pub fn authority(&self) -> String {
        match self {
            Endpoint::Unix(_) => "localhost".to_string(),
            Endpoint::Tcp { host, port } | Endpoint::Tls { host, port } => {
                format!("{host}:{port}")
            }
        }
    }
}

fn split_host_port(rest: &str, default_port: u16) -> Result<(String, u16), EndpointError> {
    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| EndpointError::InvalidPort(port_str.to_string()))?;
            (host, port)
        }
        None => (rest, default_port),
    };

    if host.is_empty() {
        return Err(EndpointError::MissingHost);
    }
    Ok((host.to_string(), port))
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::Unix(PathBuf::from(DEFAULT_SOCKET))
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Endpoint::Tls { host, port } => write!(f, "https://{host}:{port}"),
        }
    }
}

// ABOUTME: Client configuration from dockwire.yml and the DOCKER_* environment.
// ABOUTME: Resolves the engine endpoint, TLS material, and dispatcher tunables.

mod error;

pub use error::ConfigError;

use crate::client::{
    ClientOptions, DEFAULT_API_VERSION, DEFAULT_IDLE_TIMEOUT, DEFAULT_TIMEOUT, Endpoint,
    INTERACTIVE_TIMEOUT, TlsMaterial, Timeouts, WAIT_TIMEOUT,
};
use error::{HostSnafu, InvalidSnafu, ParseSnafu, ReadSnafu, YamlSnafu};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "dockwire.yml";
pub const CONFIG_FILENAME_ALT: &str = "dockwire.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".dockwire/config.yml";

pub const ENV_HOST: &str = "DOCKER_HOST";
pub const ENV_CERT_PATH: &str = "DOCKER_CERT_PATH";
pub const ENV_TLS_VERIFY: &str = "DOCKER_TLS_VERIFY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Engine endpoint URI; the local socket when unset.
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    #[serde(default = "default_interactive_timeout", with = "humantime_serde")]
    pub interactive_timeout: Duration,

    #[serde(default = "default_wait_timeout", with = "humantime_serde")]
    pub wait_timeout: Duration,

    #[serde(default = "default_max_idle")]
    pub max_idle_per_endpoint: usize,

    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// PEM material for a TLS endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub ca: PathBuf,
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
    /// Upgrades a plain `tcp://` host to TLS.
    #[serde(default = "default_verify")]
    pub verify: bool,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_idle_timeout() -> Duration {
    DEFAULT_IDLE_TIMEOUT
}

fn default_request_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_interactive_timeout() -> Duration {
    INTERACTIVE_TIMEOUT
}

fn default_wait_timeout() -> Duration {
    WAIT_TIMEOUT
}

fn default_max_idle() -> usize {
    8
}

fn default_stream_buffer() -> usize {
    64
}

fn default_verify() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            api_version: default_api_version(),
            idle_timeout: default_idle_timeout(),
            request_timeout: default_request_timeout(),
            interactive_timeout: default_interactive_timeout(),
            wait_timeout: default_wait_timeout(),
            max_idle_per_endpoint: default_max_idle(),
            stream_buffer: default_stream_buffer(),
            tls: None,
        }
    }
}

impl ClientConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).context(YamlSnafu)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadSnafu { path })?;
        let config: Self = serde_yaml::from_str(&content).context(ParseSnafu { path })?;
        config.validate()?;
        Ok(config)
    }

    /// First config file present in `dir`, if any.
    pub fn find(dir: &Path) -> Option<PathBuf> {
        [CONFIG_FILENAME, CONFIG_FILENAME_ALT, CONFIG_FILENAME_DIR]
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Load the config file in `dir`, or defaults when there is none.
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        match Self::find(dir) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading client config");
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Defaults overridden by the environment.
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// Apply `DOCKER_HOST`, `DOCKER_CERT_PATH` and `DOCKER_TLS_VERIFY`.
    pub fn apply_env(mut self) -> Self {
        if let Some(host) = env_var(ENV_HOST) {
            self.host = Some(host);
        }

        let verify = env_var(ENV_TLS_VERIFY).is_some_and(|v| v != "0");
        if let Some(dir) = env_var(ENV_CERT_PATH) {
            let dir = PathBuf::from(dir);
            self.tls = Some(TlsConfig {
                ca: dir.join("ca.pem"),
                cert: Some(dir.join("cert.pem")),
                key: Some(dir.join("key.pem")),
                verify,
            });
        } else if let Some(tls) = self.tls.as_mut()
            && env_var(ENV_TLS_VERIFY).is_some()
        {
            tls.verify = verify;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            self.stream_buffer > 0,
            InvalidSnafu {
                reason: "stream_buffer must be at least 1"
            }
        );
        for (name, value) in [
            ("idle_timeout", self.idle_timeout),
            ("request_timeout", self.request_timeout),
            ("interactive_timeout", self.interactive_timeout),
            ("wait_timeout", self.wait_timeout),
        ] {
            ensure!(
                !value.is_zero(),
                InvalidSnafu {
                    reason: format!("{name} must be greater than zero")
                }
            );
        }
        Ok(())
    }

    /// The engine endpoint. A verified TLS setup upgrades `tcp://` to TLS.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let endpoint = match &self.host {
            Some(host) => Endpoint::parse(host).context(HostSnafu { host })?,
            None => Endpoint::default(),
        };
        let upgrade = self.tls.as_ref().is_some_and(|tls| tls.verify);
        if upgrade && matches!(endpoint, Endpoint::Tcp { .. }) {
            Ok(endpoint.into_tls())
        } else {
            Ok(endpoint)
        }
    }

    pub fn tls_material(&self) -> Option<TlsMaterial> {
        self.tls.as_ref().map(|tls| TlsMaterial {
            ca: tls.ca.clone(),
            cert: tls.cert.clone(),
            key: tls.key.clone(),
        })
    }

    pub fn options(&self) -> ClientOptions {
        ClientOptions {
            api_version: self.api_version.clone(),
            idle_timeout: self.idle_timeout,
            max_idle_per_endpoint: self.max_idle_per_endpoint,
            stream_buffer: self.stream_buffer,
            timeouts: Timeouts {
                request: self.request_timeout,
                interactive: self.interactive_timeout,
                wait: self.wait_timeout,
            },
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = ClientConfig::from_yaml("{}").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.endpoint().unwrap(), Endpoint::default());
    }

    #[test]
    fn durations_use_humantime() {
        let config = ClientConfig::from_yaml("idle_timeout: 30s\nrequest_timeout: 2m\n").unwrap();
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.options().timeouts.request, Duration::from_secs(120));
    }

    #[test]
    fn zero_stream_buffer_is_invalid() {
        let err = ClientConfig::from_yaml("stream_buffer: 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn verified_tls_upgrades_tcp_host() {
        let config = ClientConfig::from_yaml(
            "host: tcp://engine.internal:2376\ntls:\n  ca: /certs/ca.pem\n",
        )
        .unwrap();
        assert!(config.endpoint().unwrap().is_tls());
    }

    #[test]
    fn bad_host_names_the_value() {
        let config = ClientConfig {
            host: Some("ftp://nope".to_string()),
            ..ClientConfig::default()
        };
        let err = config.endpoint().unwrap_err();
        assert!(err.to_string().contains("ftp://nope"));
    }
}

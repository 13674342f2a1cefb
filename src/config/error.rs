// ABOUTME: Errors raised while loading and resolving client configuration.
// ABOUTME: SNAFU context selectors attach the offending file or value to each failure.

use crate::client::EndpointError;
use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("cannot read {}: {source}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("invalid YAML in {}: {source}", path.display()))]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[snafu(display("invalid YAML: {source}"))]
    Yaml { source: serde_yaml::Error },

    #[snafu(display("invalid host {host:?}: {source}"))]
    Host {
        host: String,
        source: EndpointError,
    },

    #[snafu(display("invalid configuration: {reason}"))]
    Invalid { reason: String },
}

// ABOUTME: Application-wide error type for dockwire.
// ABOUTME: Uses thiserror to unify configuration, client, and API failures.

use crate::api::ApiError;
use crate::client;
use crate::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] client::Error),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream ended: {0}")]
    Stream(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// ABOUTME: Capability traits wrapping engine endpoints on top of the dispatcher.
// ABOUTME: Defines ContainerOps, ImageOps, ExecOps and SystemOps, all implemented by Client.

mod containers;
mod exec;
mod images;
mod models;
pub(crate) mod sealed;
mod system;

pub use containers::{
    AttachOptions, ContainerOps, ListContainersOptions, Logs, LogsOptions, RemoveOptions,
};
pub use exec::{ExecConfig, ExecOps, ExecStart, ExecStarted};
pub use images::{ImageOps, ListImagesOptions, RegistryAuth};
pub use models::*;
pub use system::{EventOptions, SystemOps};

use crate::client::{
    self, AsyncHandle, Client, CommandConfig, CommandConfigBuilder, CommandConfigError,
    RemoteErrorKind, Response,
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

impl sealed::Sealed for Client {}

/// Errors from the API wrappers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Client(#[from] client::Error),

    #[error("invalid command options: {0}")]
    Options(#[from] CommandConfigError),

    #[error("cannot decode {what} response: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// The classified engine error, when the engine rejected the call.
    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self {
            ApiError::Client(e) => e.remote_kind(),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

fn decode<T: DeserializeOwned>(response: &Response, what: &'static str) -> ApiResult<T> {
    response
        .json()
        .map_err(|source| ApiError::Decode { what, source })
}

/// Options for a subscription, optionally bound to a subscriber lifetime.
fn streaming(owner: Option<&CancellationToken>) -> CommandConfigBuilder {
    let builder = CommandConfig::builder().asynchronous(true);
    match owner {
        Some(owner) => builder.owner(owner.clone()),
        None => builder,
    }
}

async fn subscribe(client: &Client, command: client::Command) -> ApiResult<AsyncHandle> {
    Ok(client.subscribe(command).await?)
}

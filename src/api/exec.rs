// ABOUTME: Exec endpoints: run additional processes inside a running container.
// ABOUTME: Detached starts are one-shot; attached starts become interactive subscriptions.

use super::models::{ExecCreated, ExecInspect};
use super::sealed::Sealed;
use super::{ApiResult, decode, streaming, subscribe};
use crate::client::{AsyncHandle, Client, Command, DemuxMode, TimeoutPolicy};
use crate::types::{ContainerId, ExecId};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Exec instance operations.
#[async_trait]
pub trait ExecOps: Sealed + Send + Sync {
    async fn create_exec(&self, container: &ContainerId, config: &ExecConfig) -> ApiResult<ExecId>;

    async fn start_exec(&self, id: &ExecId, start: ExecStart) -> ApiResult<ExecStarted>;

    async fn inspect_exec(&self, id: &ExecId) -> ApiResult<ExecInspect>;
}

/// Body of an exec create request.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecConfig {
    pub cmd: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub tty: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub privileged: bool,
}

impl ExecConfig {
    /// Run `cmd` with stdout and stderr attached.
    pub fn command<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            attach_stdout: true,
            attach_stderr: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExecStart {
    /// Run in the background; returns once the engine has started it.
    Detached,
    /// Stream the process I/O. `tty` must match the exec's creation.
    Attached {
        tty: bool,
        owner: Option<CancellationToken>,
    },
}

#[derive(Debug)]
pub enum ExecStarted {
    Detached,
    Attached(AsyncHandle),
}

#[async_trait]
impl ExecOps for Client {
    async fn create_exec(&self, container: &ContainerId, config: &ExecConfig) -> ApiResult<ExecId> {
        let body = serde_json::to_value(config).map_err(|source| super::ApiError::Decode {
            what: "exec config",
            source,
        })?;
        let command = Command::post(format!("/containers/{}/exec", container.path_segment())).json(body);
        let response = self.request(command).await?;
        let created: ExecCreated = decode(&response, "exec create")?;
        Ok(created.id)
    }

    async fn start_exec(&self, id: &ExecId, start: ExecStart) -> ApiResult<ExecStarted> {
        let path = format!("/exec/{}/start", id.path_segment());
        match start {
            ExecStart::Detached => {
                let command = Command::post(path).json(json!({ "Detach": true, "Tty": false }));
                self.request(command).await?;
                Ok(ExecStarted::Detached)
            }
            ExecStart::Attached { tty, owner } => {
                let mode = if tty { DemuxMode::Raw } else { DemuxMode::Framed };
                let command = Command::post(path)
                    .json(json!({ "Detach": false, "Tty": tty }))
                    .interactive()
                    .mode(mode)
                    .timeout_policy(TimeoutPolicy::Interactive)
                    .config(streaming(owner.as_ref()).build()?);
                Ok(ExecStarted::Attached(subscribe(self, command).await?))
            }
        }
    }

    async fn inspect_exec(&self, id: &ExecId) -> ApiResult<ExecInspect> {
        let response = self
            .request(Command::get(format!("/exec/{}/json", id.path_segment())))
            .await?;
        decode(&response, "exec inspect")
    }
}

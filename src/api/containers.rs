// ABOUTME: Container endpoints: lifecycle, inspection, logs, attach, stats, and export.
// ABOUTME: Streaming endpoints return subscriptions; the rest are one-shot requests.

use super::models::{ContainerInspect, ContainerSummary, CreateResponse, TopResponse, WaitResponse};
use super::sealed::Sealed;
use super::{ApiResult, decode, streaming, subscribe};
use crate::client::{
    AsyncHandle, Chunk, Client, Command, CommandConfig, DemuxMode, Demuxer, Filters, Query, Sink,
    TimeoutPolicy,
};
use crate::types::ContainerId;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LIST_KEYS: &[&str] = &["all", "limit", "size", "filters"];
const CREATE_KEYS: &[&str] = &["name", "platform"];
const STOP_KEYS: &[&str] = &["t", "signal"];
const KILL_KEYS: &[&str] = &["signal"];
const WAIT_KEYS: &[&str] = &["condition"];
const REMOVE_KEYS: &[&str] = &["v", "force", "link"];
const LOGS_KEYS: &[&str] = &[
    "follow",
    "stdout",
    "stderr",
    "since",
    "until",
    "timestamps",
    "tail",
];
const ATTACH_KEYS: &[&str] = &["detachKeys", "logs", "stream", "stdin", "stdout", "stderr"];
const STATS_KEYS: &[&str] = &["stream", "one-shot"];
const TOP_KEYS: &[&str] = &["ps_args"];

/// Container lifecycle and I/O operations.
#[async_trait]
pub trait ContainerOps: Sealed + Send + Sync {
    async fn list_containers(
        &self,
        opts: &ListContainersOptions,
    ) -> ApiResult<Vec<ContainerSummary>>;

    async fn inspect_container(&self, id: &ContainerId) -> ApiResult<ContainerInspect>;

    /// Create a container from a ready-made engine body.
    async fn create_container(
        &self,
        name: Option<&str>,
        body: serde_json::Value,
    ) -> ApiResult<CreateResponse>;

    async fn start_container(&self, id: &ContainerId) -> ApiResult<()>;

    /// Stop with a graceful period of `t` before the engine kills the process.
    async fn stop_container(&self, id: &ContainerId, t: Option<Duration>) -> ApiResult<()>;

    async fn restart_container(&self, id: &ContainerId, t: Option<Duration>) -> ApiResult<()>;

    async fn kill_container(&self, id: &ContainerId, signal: Option<&str>) -> ApiResult<()>;

    /// Block until the container stops, for at most twice `timeout`.
    async fn wait_container(
        &self,
        id: &ContainerId,
        timeout: Option<Duration>,
    ) -> ApiResult<WaitResponse>;

    async fn remove_container(&self, id: &ContainerId, opts: RemoveOptions) -> ApiResult<()>;

    async fn container_logs(&self, id: &ContainerId, opts: &LogsOptions) -> ApiResult<Logs>;

    async fn attach_container(
        &self,
        id: &ContainerId,
        opts: &AttachOptions,
    ) -> ApiResult<AsyncHandle>;

    /// A single stats sample.
    async fn container_stats(&self, id: &ContainerId) -> ApiResult<serde_json::Value>;

    /// Stats samples until finished; the stream is dropped if samples stop.
    async fn stream_container_stats(
        &self,
        id: &ContainerId,
        owner: Option<&CancellationToken>,
    ) -> ApiResult<AsyncHandle>;

    async fn top_container(&self, id: &ContainerId, ps_args: Option<&str>)
    -> ApiResult<TopResponse>;

    /// Write the container filesystem as a tarball to `dest`, returning its size.
    async fn export_container(&self, id: &ContainerId, dest: &Path) -> ApiResult<u64>;
}

#[derive(Debug, Clone, Default)]
pub struct ListContainersOptions {
    /// Include stopped containers.
    pub all: bool,
    pub limit: Option<i64>,
    pub filters: Filters,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    pub force: bool,
    /// Also remove anonymous volumes.
    pub volumes: bool,
}

#[derive(Debug, Clone)]
pub struct LogsOptions {
    pub follow: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub timestamps: bool,
    /// Number of lines from the end, or `all`.
    pub tail: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    /// The container has a pseudo-terminal, so output is not multiplexed.
    pub tty: bool,
    pub owner: Option<CancellationToken>,
}

impl Default for LogsOptions {
    fn default() -> Self {
        Self {
            follow: false,
            stdout: true,
            stderr: true,
            timestamps: false,
            tail: None,
            since: None,
            until: None,
            tty: false,
            owner: None,
        }
    }
}

/// Logs either arrive in full or, when following, as a subscription.
#[derive(Debug)]
pub enum Logs {
    Complete(Vec<Chunk>),
    Following(AsyncHandle),
}

#[derive(Debug, Clone)]
pub struct AttachOptions {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    /// Replay output produced before attaching.
    pub logs: bool,
    pub tty: bool,
    pub detach_keys: Option<String>,
    pub owner: Option<CancellationToken>,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            stdin: true,
            stdout: true,
            stderr: true,
            logs: false,
            tty: false,
            detach_keys: None,
            owner: None,
        }
    }
}

fn demux_mode(tty: bool) -> DemuxMode {
    if tty { DemuxMode::Raw } else { DemuxMode::Framed }
}

fn path(id: &ContainerId, rest: &str) -> String {
    format!("/containers/{}{rest}", id.path_segment())
}

/// The engine takes the grace period in whole seconds; round up so it is
/// never shorter than asked for.
fn whole_seconds(t: Option<Duration>) -> Option<Duration> {
    t.map(|t| {
        let secs = t.as_secs() + u64::from(t.subsec_nanos() > 0);
        Duration::from_secs(secs)
    })
}

fn grace_query(t: Option<Duration>) -> Query {
    match t {
        Some(t) => Query::new().int("t", i64::try_from(t.as_secs()).unwrap_or(i64::MAX)),
        None => Query::new(),
    }
}

#[async_trait]
impl ContainerOps for Client {
    async fn list_containers(
        &self,
        opts: &ListContainersOptions,
    ) -> ApiResult<Vec<ContainerSummary>> {
        let mut query = Query::new().flag("all", opts.all).filters(&opts.filters);
        if let Some(limit) = opts.limit {
            query = query.int("limit", limit);
        }
        let response = self
            .request(Command::get("/containers/json").query(&query, LIST_KEYS))
            .await?;
        decode(&response, "container list")
    }

    async fn inspect_container(&self, id: &ContainerId) -> ApiResult<ContainerInspect> {
        let response = self.request(Command::get(path(id, "/json"))).await?;
        decode(&response, "container inspect")
    }

    async fn create_container(
        &self,
        name: Option<&str>,
        body: serde_json::Value,
    ) -> ApiResult<CreateResponse> {
        let query = Query::new().text_opt("name", name);
        let command = Command::post("/containers/create")
            .query(&query, CREATE_KEYS)
            .json(body);
        let response = self.request(command).await?;
        decode(&response, "container create")
    }

    async fn start_container(&self, id: &ContainerId) -> ApiResult<()> {
        self.request(Command::post(path(id, "/start"))).await?;
        Ok(())
    }

    async fn stop_container(&self, id: &ContainerId, t: Option<Duration>) -> ApiResult<()> {
        let t = whole_seconds(t);
        let command = Command::post(path(id, "/stop"))
            .query(&grace_query(t), STOP_KEYS)
            .timeout_policy(TimeoutPolicy::Grace(t));
        self.request(command).await?;
        Ok(())
    }

    async fn restart_container(&self, id: &ContainerId, t: Option<Duration>) -> ApiResult<()> {
        let t = whole_seconds(t);
        let command = Command::post(path(id, "/restart"))
            .query(&grace_query(t), STOP_KEYS)
            .timeout_policy(TimeoutPolicy::Grace(t));
        self.request(command).await?;
        Ok(())
    }

    async fn kill_container(&self, id: &ContainerId, signal: Option<&str>) -> ApiResult<()> {
        let query = Query::new().text_opt("signal", signal);
        self.request(Command::post(path(id, "/kill")).query(&query, KILL_KEYS))
            .await?;
        Ok(())
    }

    async fn wait_container(
        &self,
        id: &ContainerId,
        timeout: Option<Duration>,
    ) -> ApiResult<WaitResponse> {
        let query = Query::new().text("condition", "not-running");
        let command = Command::post(path(id, "/wait"))
            .query(&query, WAIT_KEYS)
            .timeout_policy(TimeoutPolicy::Wait(timeout));
        let response = self.request(command).await?;
        decode(&response, "container wait")
    }

    async fn remove_container(&self, id: &ContainerId, opts: RemoveOptions) -> ApiResult<()> {
        let query = Query::new()
            .flag("force", opts.force)
            .flag("v", opts.volumes);
        self.request(Command::delete(path(id, "")).query(&query, REMOVE_KEYS))
            .await?;
        Ok(())
    }

    async fn container_logs(&self, id: &ContainerId, opts: &LogsOptions) -> ApiResult<Logs> {
        let mut query = Query::new()
            .flag("follow", opts.follow)
            .flag("stdout", opts.stdout)
            .flag("stderr", opts.stderr)
            .flag("timestamps", opts.timestamps)
            .text_opt("tail", opts.tail.clone());
        if let Some(since) = opts.since {
            query = query.int("since", since);
        }
        if let Some(until) = opts.until {
            query = query.int("until", until);
        }

        let mode = demux_mode(opts.tty);
        let command = Command::get(path(id, "/logs"))
            .query(&query, LOGS_KEYS)
            .mode(mode);

        if command.is_async() {
            let config = streaming(opts.owner.as_ref()).build()?;
            return Ok(Logs::Following(subscribe(self, command.config(config)).await?));
        }

        let response = self.request(command).await?;
        let chunks = Demuxer::new(mode)
            .feed(response.body)
            .map_err(crate::client::Error::connection)?;
        Ok(Logs::Complete(chunks))
    }

    async fn attach_container(
        &self,
        id: &ContainerId,
        opts: &AttachOptions,
    ) -> ApiResult<AsyncHandle> {
        let query = Query::new()
            .flag("stream", true)
            .flag("stdin", opts.stdin)
            .flag("stdout", opts.stdout)
            .flag("stderr", opts.stderr)
            .flag("logs", opts.logs)
            .text_opt("detachKeys", opts.detach_keys.clone());
        let command = Command::post(path(id, "/attach"))
            .query(&query, ATTACH_KEYS)
            .interactive()
            .mode(demux_mode(opts.tty))
            .timeout_policy(TimeoutPolicy::Interactive)
            .config(streaming(opts.owner.as_ref()).build()?);
        subscribe(self, command).await
    }

    async fn container_stats(&self, id: &ContainerId) -> ApiResult<serde_json::Value> {
        let query = Query::new().flag("stream", false);
        let response = self
            .request(Command::get(path(id, "/stats")).query(&query, STATS_KEYS))
            .await?;
        decode(&response, "container stats")
    }

    async fn stream_container_stats(
        &self,
        id: &ContainerId,
        owner: Option<&CancellationToken>,
    ) -> ApiResult<AsyncHandle> {
        let query = Query::new().flag("stream", true);
        let config = streaming(owner).refresh(true).build()?;
        let command = Command::get(path(id, "/stats"))
            .query(&query, STATS_KEYS)
            .config(config);
        subscribe(self, command).await
    }

    async fn top_container(
        &self,
        id: &ContainerId,
        ps_args: Option<&str>,
    ) -> ApiResult<TopResponse> {
        let query = Query::new().text_opt("ps_args", ps_args);
        let response = self
            .request(Command::get(path(id, "/top")).query(&query, TOP_KEYS))
            .await?;
        decode(&response, "container top")
    }

    async fn export_container(&self, id: &ContainerId, dest: &Path) -> ApiResult<u64> {
        let config = CommandConfig::builder()
            .redirect(Sink::File(dest.to_path_buf()))
            .build()?;
        let response = self
            .request(Command::get(path(id, "/export")).config(config))
            .await?;
        Ok(response.bytes_written.unwrap_or_default())
    }
}

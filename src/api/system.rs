// ABOUTME: System endpoints: ping, version, info, and the engine event stream.
// ABOUTME: Events are delivered as JSON documents on a subscription.

use super::models::{SystemInfo, Version};
use super::sealed::Sealed;
use super::{ApiResult, decode, streaming, subscribe};
use crate::client::{AsyncHandle, Client, Command, Filters, Query};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const EVENT_KEYS: &[&str] = &["since", "until", "filters"];

/// Engine-wide information and events.
#[async_trait]
pub trait SystemOps: Sealed + Send + Sync {
    /// Returns the engine's ping body, normally `OK`.
    async fn ping(&self) -> ApiResult<String>;

    async fn version(&self) -> ApiResult<Version>;

    async fn info(&self) -> ApiResult<SystemInfo>;

    async fn events(&self, opts: &EventOptions) -> ApiResult<AsyncHandle>;
}

#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    /// Timestamp or relative duration understood by the engine.
    pub since: Option<String>,
    /// With `until` set the engine closes the stream itself.
    pub until: Option<String>,
    pub filters: Filters,
    /// End the stream when no event arrives for this long.
    pub idle_timeout: Option<Duration>,
    pub owner: Option<CancellationToken>,
}

#[async_trait]
impl SystemOps for Client {
    async fn ping(&self) -> ApiResult<String> {
        let response = self.request(Command::get("/_ping")).await?;
        Ok(response.text())
    }

    async fn version(&self) -> ApiResult<Version> {
        let response = self.request(Command::get("/version")).await?;
        decode(&response, "version")
    }

    async fn info(&self) -> ApiResult<SystemInfo> {
        let response = self.request(Command::get("/info")).await?;
        decode(&response, "info")
    }

    async fn events(&self, opts: &EventOptions) -> ApiResult<AsyncHandle> {
        let query = Query::new()
            .text_opt("since", opts.since.clone())
            .text_opt("until", opts.until.clone())
            .filters(&opts.filters);
        let mut config = streaming(opts.owner.as_ref());
        if let Some(idle) = opts.idle_timeout {
            config = config.idle_timeout(idle).refresh(true);
        }
        let command = Command::get("/events")
            .query(&query, EVENT_KEYS)
            .config(config.build()?);
        subscribe(self, command).await
    }
}

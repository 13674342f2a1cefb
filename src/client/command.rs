// ABOUTME: A single engine request and its validated per-call configuration.
// ABOUTME: Also owns the timeout policy that turns grace periods into dispatcher deadlines.

use super::demux::DemuxMode;
use super::query::{Query, build_path};
use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::Method;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(180_000);
pub const INTERACTIVE_TIMEOUT: Duration = Duration::from_millis(3_600_000);
pub const WAIT_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// HTTP verb of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn method(self) -> Method {
        match self {
            Verb::Get => Method::GET,
            Verb::Head => Method::HEAD,
            Verb::Post => Method::POST,
            Verb::Put => Method::PUT,
            Verb::Delete => Method::DELETE,
        }
    }
}

/// Request body. The caller builds it; the dispatcher only frames it.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(serde_json::Value),
    Raw { content_type: String, bytes: Bytes },
}

/// Where a redirected response body is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    File(PathBuf),
}

/// Deadline defaults applied by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request: Duration,
    pub interactive: Duration,
    pub wait: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request: DEFAULT_TIMEOUT,
            interactive: INTERACTIVE_TIMEOUT,
            wait: WAIT_TIMEOUT,
        }
    }
}

/// How an operation derives its deadline when the caller sets none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    #[default]
    Request,
    /// Attach streams and attached exec sessions.
    Interactive,
    /// stop/restart: twice the graceful-stop period, so the engine can kill
    /// the container after the period expires before the dispatcher gives up.
    Grace(Option<Duration>),
    /// wait: twice the caller's timeout, else the wait default.
    Wait(Option<Duration>),
}

impl TimeoutPolicy {
    pub fn effective(self, defaults: &Timeouts) -> Duration {
        match self {
            TimeoutPolicy::Request => defaults.request,
            TimeoutPolicy::Interactive => defaults.interactive,
            TimeoutPolicy::Grace(Some(t)) | TimeoutPolicy::Wait(Some(t)) => t * 2,
            TimeoutPolicy::Grace(None) => defaults.request,
            TimeoutPolicy::Wait(None) => defaults.wait,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandConfigError {
    #[error("redirect cannot be combined with async")]
    RedirectWithAsync,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Per-call options, validated when built.
#[derive(Debug, Clone, Default)]
pub struct CommandConfig {
    force_new: bool,
    asynchronous: bool,
    idle_timeout: Option<Duration>,
    refresh: bool,
    redirect: Option<Sink>,
    timeout: Option<Duration>,
    headers: HeaderMap,
    owner: Option<CancellationToken>,
}

impl CommandConfig {
    pub fn builder() -> CommandConfigBuilder {
        CommandConfigBuilder::default()
    }

    /// Open a dedicated connection instead of reusing the pool.
    pub fn force_new(&self) -> bool {
        self.force_new
    }

    /// Stream the response and return a subscription handle.
    pub fn is_async(&self) -> bool {
        self.asynchronous
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Reset the idle timer on every received frame.
    pub fn refresh(&self) -> bool {
        self.refresh
    }

    pub fn redirect(&self) -> Option<&Sink> {
        self.redirect.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Lifetime of the subscriber; cancelling it ends the subscription.
    pub fn owner(&self) -> Option<&CancellationToken> {
        self.owner.as_ref()
    }
}

#[derive(Debug, Default)]
pub struct CommandConfigBuilder {
    config: CommandConfig,
    header_error: Option<CommandConfigError>,
}

impl CommandConfigBuilder {
    pub fn force_new(mut self, force_new: bool) -> Self {
        self.config.force_new = force_new;
        self
    }

    pub fn asynchronous(mut self, asynchronous: bool) -> Self {
        self.config.asynchronous = asynchronous;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.config.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn refresh(mut self, refresh: bool) -> Self {
        self.config.refresh = refresh;
        self
    }

    pub fn redirect(mut self, sink: Sink) -> Self {
        self.config.redirect = Some(sink);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn owner(mut self, owner: CancellationToken) -> Self {
        self.config.owner = Some(owner);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        let parsed = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| e.to_string())
            .and_then(|n| {
                HeaderValue::from_str(value)
                    .map(|v| (n, v))
                    .map_err(|e| e.to_string())
            });
        match parsed {
            Ok((n, v)) => {
                self.config.headers.insert(n, v);
            }
            Err(reason) => {
                self.header_error.get_or_insert(CommandConfigError::InvalidHeader {
                    name: name.to_string(),
                    reason,
                });
            }
        }
        self
    }

    pub fn build(self) -> Result<CommandConfig, CommandConfigError> {
        if let Some(err) = self.header_error {
            return Err(err);
        }
        let config = self.config;
        if config.redirect.is_some() && config.asynchronous {
            return Err(CommandConfigError::RedirectWithAsync);
        }
        if config.timeout == Some(Duration::ZERO) {
            return Err(CommandConfigError::ZeroDuration("timeout"));
        }
        if config.idle_timeout == Some(Duration::ZERO) {
            return Err(CommandConfigError::ZeroDuration("idle_timeout"));
        }
        Ok(config)
    }
}

/// One logical request to the engine.
#[derive(Debug, Clone)]
pub struct Command {
    verb: Verb,
    path: String,
    body: Option<Body>,
    config: CommandConfig,
    mode: DemuxMode,
    policy: TimeoutPolicy,
    unbounded: bool,
    upgrade: bool,
}

impl Command {
    /// `path` is relative to the API version prefix, e.g. `/containers/json`.
    pub fn new(verb: Verb, path: impl Into<String>) -> Self {
        Self {
            verb,
            path: path.into(),
            body: None,
            config: CommandConfig::default(),
            mode: DemuxMode::Json,
            policy: TimeoutPolicy::Request,
            unbounded: false,
            upgrade: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Verb::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Verb::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Verb::Delete, path)
    }

    /// Append the accepted options. `follow`/`stream` force async handling.
    pub fn query(mut self, query: &Query, allowed: &[&str]) -> Self {
        self.path = build_path(&self.path, query, allowed);
        self.unbounded = query.is_unbounded()
            && allowed
                .iter()
                .any(|key| *key == "follow" || *key == "stream");
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(Body::Json(body));
        self
    }

    pub fn raw(mut self, content_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        self.body = Some(Body::Raw {
            content_type: content_type.into(),
            bytes: bytes.into(),
        });
        self
    }

    pub fn config(mut self, config: CommandConfig) -> Self {
        self.config = config;
        self
    }

    /// How a streamed response is decoded.
    pub fn mode(mut self, mode: DemuxMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Request a connection upgrade so the stream also accepts input.
    pub fn interactive(mut self) -> Self {
        self.upgrade = true;
        self
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn settings(&self) -> &CommandConfig {
        &self.config
    }

    pub fn demux_mode(&self) -> DemuxMode {
        self.mode
    }

    pub fn is_upgrade(&self) -> bool {
        self.upgrade
    }

    /// Async when requested or when the response body is unbounded.
    pub fn is_async(&self) -> bool {
        self.config.is_async() || self.unbounded || self.upgrade
    }

    /// Explicit caller timeout first, then the operation's policy.
    pub fn effective_timeout(&self, defaults: &Timeouts) -> Duration {
        self.config
            .timeout()
            .unwrap_or_else(|| self.policy.effective(defaults))
    }
}

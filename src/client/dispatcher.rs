// ABOUTME: Command dispatcher: the Client every engine call goes through.
// ABOUTME: Runs sync exchanges under a deadline or starts a subscription and returns its handle.

use super::command::{Body, Command, DEFAULT_IDLE_TIMEOUT, Sink, Timeouts};
use super::connection::{Connection, ConnectionId, RequestBody};
use super::endpoint::Endpoint;
use super::error::{Error, Result};
use super::pool::{ConnectionPool, PoolStats};
use super::registry::{BoxedWriter, InputSlot, SubscriptionRegistry};
use super::subscription::{ByteSource, EndReason, Pump, Subscription};
use super::transport::{SocketTransport, Transport};
use crate::config::ClientConfig;
use crate::types::Reference;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, future};
use http_body_util::{BodyExt, BodyStream, Full};
use hyper::StatusCode;
use hyper::body::Incoming;
use hyper::header::{CONNECTION, CONTENT_TYPE, HOST, HeaderMap, UPGRADE};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::OwnedMutexGuard;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_API_VERSION: &str = "v1.43";

/// Tunables for a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Path prefix for every request, e.g. `v1.43`. Empty means unversioned.
    pub api_version: String,
    /// How long a released connection stays pooled.
    pub idle_timeout: Duration,
    pub max_idle_per_endpoint: usize,
    /// Messages buffered per subscription before the read loop blocks.
    pub stream_buffer: usize,
    pub timeouts: Timeouts,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_idle_per_endpoint: 8,
            stream_buffer: 64,
            timeouts: Timeouts::default(),
        }
    }
}

/// A fully received response.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Empty when the body was redirected.
    pub body: Bytes,
    /// The connection the exchange ran on.
    pub connection: ConnectionId,
    /// Bytes written to the redirect sink, if one was used.
    pub bytes_written: Option<u64>,
}

impl Response {
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Write side and lifetime control of one subscription.
#[derive(Clone)]
pub struct ConnectionHandle {
    reference: Reference,
    connection: ConnectionId,
    registry: Arc<SubscriptionRegistry>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.connection
    }

    pub fn reference(&self) -> Reference {
        self.reference
    }

    /// Write into the stream's input (attach/exec stdin).
    pub async fn send(&self, bytes: impl AsRef<[u8]>) -> Result<()> {
        send_input(&self.registry, self.reference, bytes.as_ref()).await
    }

    pub fn finish(&self) -> Result<()> {
        self.registry.finish(self.reference)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("reference", &self.reference)
            .field("connection", &self.connection)
            .finish()
    }
}

/// Result of an asynchronous dispatch.
#[derive(Debug)]
pub struct AsyncHandle {
    pub reference: Reference,
    pub connection: ConnectionHandle,
    pub subscription: Subscription,
}

#[derive(Debug)]
pub enum Dispatched {
    Complete(Response),
    Streaming(AsyncHandle),
}

/// Entry point for every engine command.
///
/// Cheap to clone; clones share the pool and the subscription registry.
#[derive(Clone)]
pub struct Client {
    endpoint: Endpoint,
    api_version: String,
    pool: Arc<ConnectionPool>,
    registry: Arc<SubscriptionRegistry>,
    timeouts: Timeouts,
    stream_buffer: usize,
}

impl Client {
    /// Plain Unix or TCP client with default options.
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_transport(endpoint, Arc::new(SocketTransport::new()), ClientOptions::default())
    }

    pub fn with_transport(
        endpoint: Endpoint,
        transport: Arc<dyn Transport>,
        options: ClientOptions,
    ) -> Self {
        Self {
            endpoint,
            api_version: options.api_version,
            pool: ConnectionPool::new(transport, options.idle_timeout, options.max_idle_per_endpoint),
            registry: Arc::new(SubscriptionRegistry::new()),
            timeouts: options.timeouts,
            stream_buffer: options.stream_buffer,
        }
    }

    /// Build a client from resolved configuration, loading TLS material
    /// when the endpoint needs it.
    pub fn from_config(config: &ClientConfig) -> crate::error::Result<Self> {
        let endpoint = config.endpoint()?;
        let transport = match config.tls_material() {
            Some(material) => SocketTransport::with_tls(&material)?,
            None => SocketTransport::new(),
        };
        Ok(Self::with_transport(endpoint, Arc::new(transport), config.options()))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// Run a command. Synchronous commands return the full response;
    /// asynchronous ones return once the subscription is registered.
    pub async fn dispatch(&self, command: Command) -> Result<Dispatched> {
        if command.is_async() {
            self.subscribe(command).await.map(Dispatched::Streaming)
        } else {
            self.request(command).await.map(Dispatched::Complete)
        }
    }

    /// End a subscription.
    pub fn finish(&self, reference: Reference) -> Result<()> {
        self.registry.finish(reference)
    }

    /// Write into an interactive subscription's input.
    pub async fn send(&self, reference: Reference, bytes: impl AsRef<[u8]>) -> Result<()> {
        send_input(&self.registry, reference, bytes.as_ref()).await
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn idle_connections(&self) -> Vec<ConnectionId> {
        self.pool.idle_connections(&self.endpoint)
    }

    pub fn active_subscriptions(&self) -> usize {
        self.registry.len()
    }

    pub fn is_subscribed(&self, reference: Reference) -> bool {
        self.registry.contains(reference)
    }

    /// Synchronous exchange bounded by the command's effective timeout.
    pub(crate) async fn request(&self, command: Command) -> Result<Response> {
        let timeout = command.effective_timeout(&self.timeouts);
        let request = self.build_request(&command)?;
        let settings = command.settings();
        tracing::debug!(verb = ?command.verb(), path = command.path(), ?timeout, "dispatching");

        let mut conn = self.pool.acquire(&self.endpoint, settings.force_new()).await?;
        let connection = conn.id();
        let exchanged =
            tokio::time::timeout(timeout, exchange(&mut conn, request, settings.redirect())).await;

        match exchanged {
            Err(_) => {
                tracing::debug!(%connection, ?timeout, "request timed out, closing connection");
                Err(Error::Timeout(timeout))
            }
            Ok(Ok(received)) => {
                self.pool.release(conn, settings.idle_timeout());
                Ok(Response {
                    status: received.status,
                    headers: received.headers,
                    body: received.body,
                    connection,
                    bytes_written: received.bytes_written,
                })
            }
            // The error body was read in full, so the connection is reusable.
            Ok(Err(err @ Error::Remote { .. })) => {
                self.pool.release(conn, settings.idle_timeout());
                Err(err)
            }
            Ok(Err(err)) => Err(err),
        }
    }

    /// Register a subscription and start its read loop.
    pub(crate) async fn subscribe(&self, command: Command) -> Result<AsyncHandle> {
        let timeout = command.effective_timeout(&self.timeouts);
        let request = self.build_request(&command)?;
        let settings = command.settings().clone();
        let mode = command.demux_mode();
        let upgrade = command.is_upgrade();

        let conn = self.pool.acquire(&self.endpoint, settings.force_new()).await?;
        let connection = conn.id();

        let input: Option<InputSlot> = upgrade.then(|| Arc::new(tokio::sync::Mutex::new(None)));
        // Held until the upgrade completes so early writers wait for it.
        let input_guard = input
            .as_ref()
            .and_then(|slot| slot.clone().try_lock_owned().ok());

        let (reference, cancel) =
            self.registry
                .register(connection, settings.owner(), mode, input);
        let (tx, subscription) = Subscription::channel(reference, self.stream_buffer);
        let pump = Pump::new(reference, tx, cancel.clone(), mode)
            .owner(settings.owner().cloned())
            .idle(settings.idle_timeout(), settings.refresh(), self.pool.idle_timeout());

        tracing::debug!(
            verb = ?command.verb(),
            path = command.path(),
            %reference,
            %connection,
            "dispatching stream"
        );

        let task = StreamTask {
            reference,
            pool: self.pool.clone(),
            registry: self.registry.clone(),
            conn,
            cancel,
            timeout,
            upgrade,
            idle_timeout: settings.idle_timeout(),
        };
        tokio::spawn(task.run(request, pump, input_guard));

        Ok(AsyncHandle {
            reference,
            connection: ConnectionHandle {
                reference,
                connection,
                registry: self.registry.clone(),
            },
            subscription,
        })
    }

    fn build_request(&self, command: &Command) -> Result<hyper::Request<RequestBody>> {
        let uri = if self.api_version.is_empty() {
            command.path().to_string()
        } else {
            format!("/{}{}", self.api_version, command.path())
        };

        let mut builder = hyper::Request::builder()
            .method(command.verb().method())
            .uri(uri)
            .header(HOST, self.endpoint.authority());

        let body = match command.body() {
            None => Bytes::new(),
            Some(Body::Json(value)) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Bytes::from(serde_json::to_vec(value).map_err(Error::connection)?)
            }
            Some(Body::Raw {
                content_type,
                bytes,
            }) => {
                builder = builder.header(CONTENT_TYPE, content_type.as_str());
                bytes.clone()
            }
        };

        if command.is_upgrade() {
            builder = builder.header(CONNECTION, "Upgrade").header(UPGRADE, "tcp");
        }

        let mut request = builder.body(Full::new(body)).map_err(Error::connection)?;
        for (name, value) in command.settings().headers() {
            request.headers_mut().insert(name.clone(), value.clone());
        }
        Ok(request)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("subscriptions", &self.registry.len())
            .finish()
    }
}

struct Received {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    bytes_written: Option<u64>,
}

async fn exchange(
    conn: &mut Connection,
    request: hyper::Request<RequestBody>,
    redirect: Option<&Sink>,
) -> Result<Received> {
    let response = conn.send(request).await?;
    let (parts, body) = response.into_parts();

    if !parts.status.is_success() {
        let body = collect(body).await?;
        return Err(Error::from_response(parts.status.as_u16(), &body));
    }

    let (body, bytes_written) = match redirect {
        Some(Sink::File(path)) => (Bytes::new(), Some(write_to_file(body, path).await?)),
        None => (collect(body).await?, None),
    };
    Ok(Received {
        status: parts.status,
        headers: parts.headers,
        body,
        bytes_written,
    })
}

async fn collect(body: Incoming) -> Result<Bytes> {
    Ok(body.collect().await.map_err(Error::connection)?.to_bytes())
}

async fn write_to_file(body: Incoming, path: &Path) -> Result<u64> {
    let sink_error = |e: std::io::Error| Error::Connection(format!("redirect to {}: {e}", path.display()));
    let mut file = tokio::fs::File::create(path).await.map_err(sink_error)?;
    let mut frames = BodyStream::new(body);
    let mut written = 0u64;
    while let Some(frame) = frames.next().await {
        let frame = frame.map_err(Error::connection)?;
        if let Ok(data) = frame.into_data() {
            file.write_all(&data).await.map_err(sink_error)?;
            written += data.len() as u64;
        }
    }
    file.flush().await.map_err(sink_error)?;
    Ok(written)
}

async fn send_input(registry: &SubscriptionRegistry, reference: Reference, bytes: &[u8]) -> Result<()> {
    let slot = registry.input(reference)?;
    let mut guard = slot.lock().await;
    let writer = guard
        .as_mut()
        .ok_or_else(|| Error::Connection(format!("input of {reference} is closed")))?;
    writer.write_all(bytes).await.map_err(Error::connection)?;
    writer.flush().await.map_err(Error::connection)
}

/// Owner of a subscription's connection for the life of the stream.
struct StreamTask {
    reference: Reference,
    pool: Arc<ConnectionPool>,
    registry: Arc<SubscriptionRegistry>,
    conn: Connection,
    cancel: CancellationToken,
    timeout: Duration,
    upgrade: bool,
    idle_timeout: Option<Duration>,
}

impl StreamTask {
    async fn run(
        mut self,
        request: hyper::Request<RequestBody>,
        mut pump: Pump,
        input: Option<OwnedMutexGuard<Option<BoxedWriter>>>,
    ) {
        let timeout = self.timeout;
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EndReason::Finished),
            opened = tokio::time::timeout(timeout, open_stream(&mut self.conn, request, self.upgrade, input)) => {
                opened.unwrap_or_else(|_| {
                    Err(EndReason::ConnectionLost(format!("no response within {timeout:?}")))
                })
            }
        };

        let reason = match opened {
            Ok(source) => pump.run(source).await,
            Err(reason) => reason,
        };

        self.registry.remove(self.reference);
        if reason == EndReason::Closed && !self.upgrade {
            self.pool.release(self.conn, self.idle_timeout);
        } else {
            drop(self.conn);
        }
        pump.end(reason).await;
    }
}

/// Send the request and turn the response into the subscription's byte source.
async fn open_stream(
    conn: &mut Connection,
    request: hyper::Request<RequestBody>,
    upgrade: bool,
    input: Option<OwnedMutexGuard<Option<BoxedWriter>>>,
) -> std::result::Result<ByteSource, EndReason> {
    let response = conn
        .send(request)
        .await
        .map_err(|e| EndReason::ConnectionLost(e.to_string()))?;
    let status = response.status();

    if upgrade && status == StatusCode::SWITCHING_PROTOCOLS {
        let upgraded = hyper::upgrade::on(response)
            .await
            .map_err(|e| EndReason::ConnectionLost(format!("upgrade failed: {e}")))?;
        let (read, write) = tokio::io::split(TokioIo::new(upgraded));
        if let Some(mut slot) = input {
            *slot = Some(Box::new(write));
        }
        return Ok(ReaderStream::new(read).map_err(|e| e.to_string()).boxed());
    }

    if !status.is_success() {
        let body = response
            .into_body()
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .unwrap_or_default();
        let err = Error::from_response(status.as_u16(), &body);
        return Err(EndReason::RemoteError(err.to_string()));
    }

    Ok(BodyStream::new(response.into_body())
        .try_filter_map(|frame| future::ready(Ok(frame.into_data().ok())))
        .map_err(|e| e.to_string())
        .boxed())
}

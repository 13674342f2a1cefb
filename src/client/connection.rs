// ABOUTME: One HTTP/1.1 connection to the engine and the task that drives it.
// ABOUTME: Each connection is owned by exactly one holder: the pool, a call, or a subscription.

use super::endpoint::Endpoint;
use super::error::{Error, Result};
use super::transport::Transport;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;

/// Identity of a transport connection, stable for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ConnectionId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn for_tests(n: u64) -> Self {
        ConnectionId(n)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub(crate) type RequestBody = Full<Bytes>;

/// A live HTTP/1.1 link to the engine.
///
/// Dropping a `Connection` closes it: the driver task is aborted, which also
/// ends any response body still being read from it.
pub struct Connection {
    id: ConnectionId,
    endpoint: Endpoint,
    sender: http1::SendRequest<RequestBody>,
    driver: JoinHandle<()>,
    single_use: bool,
}

impl Connection {
    /// Open a new connection and spawn its driver task.
    pub(crate) async fn open(transport: &dyn Transport, endpoint: &Endpoint) -> Result<Self> {
        let io = transport.open(endpoint).await?;

        let (sender, conn) = http1::handshake(TokioIo::new(io))
            .await
            .map_err(|e| Error::Connection(format!("HTTP handshake failed: {e}")))?;

        let id = ConnectionId::next();
        let driver = tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::warn!(connection = %id, "engine connection error: {}", e);
            }
        });

        tracing::debug!(connection = %id, %endpoint, "opened engine connection");

        Ok(Self {
            id,
            endpoint: endpoint.clone(),
            sender,
            driver,
            single_use: false,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// False once the engine closed its side or the driver stopped.
    pub fn is_live(&self) -> bool {
        !self.sender.is_closed() && !self.driver.is_finished()
    }

    /// Mark the connection to be closed instead of pooled when released.
    pub(crate) fn set_single_use(&mut self, single_use: bool) {
        self.single_use = single_use;
    }

    pub(crate) fn is_single_use(&self) -> bool {
        self.single_use
    }

    /// Send one request and wait for the response head.
    pub(crate) async fn send(
        &mut self,
        request: hyper::Request<RequestBody>,
    ) -> Result<hyper::Response<Incoming>> {
        self.sender
            .ready()
            .await
            .map_err(|e| Error::Connection(format!("{} not ready: {e}", self.id)))?;
        self.sender
            .send_request(request)
            .await
            .map_err(|e| Error::Connection(format!("request on {} failed: {e}", self.id)))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.driver.abort();
        tracing::debug!(connection = %self.id, "closed engine connection");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("single_use", &self.single_use)
            .finish()
    }
}

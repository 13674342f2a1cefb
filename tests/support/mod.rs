// ABOUTME: Test support utilities.
// ABOUTME: Provides tracing setup and an in-process fake engine on a Unix socket.

// Each test binary only uses some of these helpers, so allow dead_code.
#![allow(dead_code)]

use dockwire::client::demux::{Channel, encode_frame};
use dockwire::client::{Client, ClientOptions, Endpoint, SocketTransport};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env()
            .add_directive("dockwire=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// One request as the fake engine received it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    /// Full request target, including the version prefix and query.
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Which accepted connection carried it, counting from 1.
    pub connection: usize,
}

impl Recorded {
    /// Path without the `/vX.Y` prefix and without the query.
    pub fn route(&self) -> &str {
        let path = self.target.split('?').next().unwrap_or_default();
        match path.strip_prefix("/v") {
            Some(rest) => rest.find('/').map(|i| &rest[i..]).unwrap_or(path),
            None => path,
        }
    }

    pub fn query(&self) -> &str {
        self.target.split_once('?').map(|(_, q)| q).unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// How the fake engine answers a request.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(u16, serde_json::Value),
    Text(u16, String),
    /// Chunked body written part by part after each delay. With `end` the
    /// body is terminated; without, the engine keeps the stream open.
    Stream {
        parts: Vec<(Duration, Vec<u8>)>,
        end: bool,
    },
    /// `101` upgrade, then echo every input back.
    Upgrade { framed: bool },
    /// Never answer.
    Hang,
}

impl Reply {
    pub fn ok_json(value: serde_json::Value) -> Self {
        Reply::Json(200, value)
    }

    pub fn error(status: u16, message: &str) -> Self {
        Reply::Json(status, serde_json::json!({ "message": message }))
    }

    pub fn empty(status: u16) -> Self {
        Reply::Text(status, String::new())
    }

    /// A finished stream of newline-separated JSON documents.
    pub fn json_lines(values: &[serde_json::Value]) -> Self {
        Reply::Stream {
            parts: values
                .iter()
                .map(|v| (Duration::ZERO, format!("{v}\n").into_bytes()))
                .collect(),
            end: true,
        }
    }

    /// A stream that sends `part` every `every` for a long time.
    pub fn ticking(every: Duration, part: &[u8]) -> Self {
        Reply::Stream {
            parts: (0..10_000).map(|_| (every, part.to_vec())).collect(),
            end: false,
        }
    }
}

type Handler = Arc<dyn Fn(&Recorded) -> Reply + Send + Sync>;

/// An engine double bound to a temporary Unix socket.
pub struct FakeEngine {
    path: PathBuf,
    _dir: tempfile::TempDir,
    accepted: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Recorded>>>,
    task: JoinHandle<()>,
}

impl FakeEngine {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let task = {
            let accepted = accepted.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let connection = accepted.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::spawn(serve(stream, connection, handler.clone(), requests.clone()));
                }
            })
        };

        Self {
            path,
            _dir: dir,
            accepted,
            requests,
            task,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn host(&self) -> String {
        format!("unix://{}", self.path.display())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::Unix(self.path.clone())
    }

    pub fn client(&self) -> Client {
        self.client_with(ClientOptions::default())
    }

    pub fn client_with(&self, options: ClientOptions) -> Client {
        Client::with_transport(self.endpoint(), Arc::new(SocketTransport::new()), options)
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Recorded {
        self.requests().pop().expect("no request received")
    }
}

impl Drop for FakeEngine {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: UnixStream,
    connection: usize,
    handler: Handler,
    requests: Arc<Mutex<Vec<Recorded>>>,
) {
    let mut reader = BufReader::new(stream);
    loop {
        let Some(request) = read_request(&mut reader, connection).await else {
            return;
        };
        requests.lock().unwrap().push(request.clone());

        match handler(&request) {
            Reply::Json(status, value) => {
                let body = value.to_string();
                if write_response(&mut reader, status, "application/json", body.as_bytes())
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Reply::Text(status, body) => {
                if write_response(&mut reader, status, "text/plain", body.as_bytes())
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Reply::Stream { parts, end } => {
                let head = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n";
                if reader.get_mut().write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for (delay, part) in parts {
                    tokio::time::sleep(delay).await;
                    let mut chunk = format!("{:x}\r\n", part.len()).into_bytes();
                    chunk.extend_from_slice(&part);
                    chunk.extend_from_slice(b"\r\n");
                    if reader.get_mut().write_all(&chunk).await.is_err() {
                        return;
                    }
                }
                if !end {
                    std::future::pending::<()>().await;
                }
                if reader.get_mut().write_all(b"0\r\n\r\n").await.is_err() {
                    return;
                }
            }
            Reply::Upgrade { framed } => {
                let head = "HTTP/1.1 101 UPGRADED\r\nContent-Type: application/vnd.docker.raw-stream\r\nConnection: Upgrade\r\nUpgrade: tcp\r\n\r\n";
                if reader.get_mut().write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                let mut buf = [0u8; 4096];
                loop {
                    let n = match reader.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    let out = if framed {
                        encode_frame(Channel::Stdout, &buf[..n]).to_vec()
                    } else {
                        buf[..n].to_vec()
                    };
                    if reader.get_mut().write_all(&out).await.is_err() {
                        return;
                    }
                }
            }
            Reply::Hang => std::future::pending::<()>().await,
        }
    }
}

async fn read_request(reader: &mut BufReader<UnixStream>, connection: usize) -> Option<Recorded> {
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await.ok()? == 0 {
            return None;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        let (name, value) = header.split_once(':')?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.ok()?;

    Some(Recorded {
        method,
        target,
        headers,
        body,
        connection,
    })
}

async fn write_response(
    reader: &mut BufReader<UnixStream>,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> std::io::Result<()> {
    let (body, length) = if status == 204 || status == 304 {
        (&[][..], 0)
    } else {
        (body, body.len())
    };
    let head = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nContent-Length: {length}\r\n\r\n",
        reason(status)
    );
    let stream = reader.get_mut();
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        304 => "Not Modified",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

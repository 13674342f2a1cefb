// ABOUTME: Closed error taxonomy for every command failure surfaced to callers.
// ABOUTME: Classifies engine status codes and error bodies into RemoteErrorKind.

use crate::types::Reference;
use serde::Deserialize;
use std::time::Duration;

/// Classified kind of an engine-reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// 304: the object is already in the requested state.
    NotModified,
    /// 400: the engine rejected a parameter.
    BadParameter,
    /// 404: no such container, image, exec instance, or endpoint.
    NotFound,
    /// 409 reported for a container that is not running (or is paused).
    NotRunning,
    /// 409: the request conflicts with the object's current state.
    Conflict,
    /// 500 and above.
    ServerError,
    /// Any other non-success status, passed through verbatim.
    Status(u16),
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteErrorKind::NotModified => f.write_str("not_modified"),
            RemoteErrorKind::BadParameter => f.write_str("bad_parameter"),
            RemoteErrorKind::NotFound => f.write_str("not_found"),
            RemoteErrorKind::NotRunning => f.write_str("not_running"),
            RemoteErrorKind::Conflict => f.write_str("conflict"),
            RemoteErrorKind::ServerError => f.write_str("server_error"),
            RemoteErrorKind::Status(code) => write!(f, "{code}"),
        }
    }
}

/// Errors returned by the dispatcher, the registry, and the API wrappers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("unknown subscription: {0}")]
    NotFound(Reference),

    #[error("{kind} ({status}): {message}")]
    Remote {
        kind: RemoteErrorKind,
        status: u16,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn connection(err: impl std::fmt::Display) -> Self {
        Error::Connection(err.to_string())
    }

    /// Build the error for a non-success engine response.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let message = error_message(body);
        Error::Remote {
            kind: classify_message(status, &message),
            status,
            message,
        }
    }

    /// The classified remote kind, if the engine produced this error.
    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self {
            Error::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.remote_kind() == Some(RemoteErrorKind::NotFound)
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Map a status code and response body to its error kind.
///
/// Checked in priority order: 304, 400, 404, 409, then 5xx. Everything else
/// is carried through as [`RemoteErrorKind::Status`].
pub fn classify(status: u16, body: &[u8]) -> RemoteErrorKind {
    classify_message(status, &error_message(body))
}

fn classify_message(status: u16, message: &str) -> RemoteErrorKind {
    match status {
        304 => RemoteErrorKind::NotModified,
        400 => RemoteErrorKind::BadParameter,
        404 => RemoteErrorKind::NotFound,
        409 if reports_not_running(message) => RemoteErrorKind::NotRunning,
        409 => RemoteErrorKind::Conflict,
        s if s >= 500 => RemoteErrorKind::ServerError,
        s => RemoteErrorKind::Status(s),
    }
}

fn reports_not_running(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("is not running") || lower.contains("is paused")
}

/// The engine sends `{"message": "..."}`; fall back to the raw text.
fn error_message(body: &[u8]) -> String {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    }
}

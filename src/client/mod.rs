// ABOUTME: Engine client core: dispatcher, connection pool, subscriptions, and stream decoding.
// ABOUTME: Re-exports the types callers need to build, dispatch, and consume commands.

mod codec;
mod command;
mod connection;
pub mod demux;
mod dispatcher;
mod endpoint;
mod error;
mod pool;
mod query;
mod registry;
mod subscription;
mod transport;

pub use codec::{DecodeError, Decoded, FrameDecoder, JsonDecoder};
pub use command::{
    Body, Command, CommandConfig, CommandConfigBuilder, CommandConfigError, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_TIMEOUT, INTERACTIVE_TIMEOUT, Sink, TimeoutPolicy, Timeouts, Verb, WAIT_TIMEOUT,
};
pub use connection::ConnectionId;
pub use demux::{Channel, Chunk, DemuxMode, Demuxer};
pub use dispatcher::{
    AsyncHandle, Client, ClientOptions, ConnectionHandle, DEFAULT_API_VERSION, Dispatched, Response,
};
pub use endpoint::{DEFAULT_PLAIN_PORT, DEFAULT_SOCKET, DEFAULT_TLS_PORT, Endpoint, EndpointError};
pub use error::{Error, RemoteErrorKind, Result, classify};
pub use pool::PoolStats;
pub use query::{FilterSpec, FilterValue, Filters, Query, build_path};
pub use registry::SubscriptionRegistry;
pub use subscription::{EndReason, Message, Payload, Subscription};
pub use transport::{BoxedIo, Io, SocketTransport, TlsMaterial, Transport};

// ABOUTME: Table of active asynchronous exchanges keyed by Reference.
// ABOUTME: Binds each subscription to its connection, subscriber lifetime, and optional input side.

use super::connection::ConnectionId;
use super::demux::DemuxMode;
use super::error::{Error, Result};
use crate::types::Reference;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

/// Write side of an upgraded attach/exec stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Input channel of an interactive subscription.
///
/// Empty until the connection upgrade completes; while the dispatcher is
/// still upgrading it holds the lock, so writers wait instead of failing.
pub type InputSlot = Arc<tokio::sync::Mutex<Option<BoxedWriter>>>;

struct Registration {
    connection: ConnectionId,
    mode: DemuxMode,
    cancel: CancellationToken,
    input: Option<InputSlot>,
}

/// Every live subscription, and nothing else.
///
/// An entry exists from registration until the subscription ends; after
/// that its reference is unknown and `finish` reports `NotFound`.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<Reference, Registration>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription on `connection` and mint its reference.
    ///
    /// The returned token is cancelled by `finish` and, when an owner is
    /// given, by the owner's cancellation.
    pub fn register(
        &self,
        connection: ConnectionId,
        owner: Option<&CancellationToken>,
        mode: DemuxMode,
        input: Option<InputSlot>,
    ) -> (Reference, CancellationToken) {
        let reference = Reference::fresh();
        let cancel = match owner {
            Some(owner) => owner.child_token(),
            None => CancellationToken::new(),
        };
        self.entries.lock().insert(
            reference,
            Registration {
                connection,
                mode,
                cancel: cancel.clone(),
                input,
            },
        );
        tracing::debug!(%reference, %connection, ?mode, "registered subscription");
        (reference, cancel)
    }

    /// End a subscription. Its read loop stops and delivers the terminal
    /// message; no further data is delivered once this returns.
    pub fn finish(&self, reference: Reference) -> Result<()> {
        let registration = self
            .entries
            .lock()
            .remove(&reference)
            .ok_or(Error::NotFound(reference))?;
        registration.cancel.cancel();
        tracing::debug!(%reference, "finished subscription");
        Ok(())
    }

    /// Drop the entry once the read loop has ended on its own.
    pub(crate) fn remove(&self, reference: Reference) -> bool {
        self.entries.lock().remove(&reference).is_some()
    }

    pub(crate) fn input(&self, reference: Reference) -> Result<InputSlot> {
        let entries = self.entries.lock();
        let registration = entries.get(&reference).ok_or(Error::NotFound(reference))?;
        registration
            .input
            .clone()
            .ok_or_else(|| Error::Connection(format!("{reference} does not accept input")))
    }

    pub fn contains(&self, reference: Reference) -> bool {
        self.entries.lock().contains_key(&reference)
    }

    pub fn connection_of(&self, reference: Reference) -> Option<ConnectionId> {
        self.entries.lock().get(&reference).map(|r| r.connection)
    }

    pub fn mode_of(&self, reference: Reference) -> Option<DemuxMode> {
        self.entries.lock().get(&reference).map(|r| r.mode)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("active", &self.len())
            .finish()
    }
}

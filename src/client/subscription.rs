// ABOUTME: Subscriber-side message stream and the read loop that feeds it.
// ABOUTME: One loop per subscription: decode, deliver in order with backpressure, end exactly once.

use super::codec::{Decoded, FrameDecoder};
use super::demux::{Chunk, DemuxMode};
use crate::types::Reference;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a subscription ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The engine closed the stream cleanly.
    Closed,
    /// The engine answered with an error status, or sent undecodable data.
    RemoteError(String),
    /// The connection died mid-stream.
    ConnectionLost(String),
    /// Finished by `finish`, or the subscriber went away.
    Finished,
    /// No frame arrived within the idle timeout.
    IdleTimeout,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::Closed => f.write_str("normal close"),
            EndReason::RemoteError(msg) => write!(f, "remote error: {msg}"),
            EndReason::ConnectionLost(msg) => write!(f, "connection lost: {msg}"),
            EndReason::Finished => f.write_str("explicitly finished"),
            EndReason::IdleTimeout => f.write_str("idle timeout"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// One document of an events/stats/progress stream.
    Json(Value),
    /// Output of a logs/attach/exec stream.
    Chunk(Chunk),
    /// Terminal marker; always the last message of a subscription.
    End(EndReason),
}

impl From<Decoded> for Payload {
    fn from(decoded: Decoded) -> Self {
        match decoded {
            Decoded::Json(value) => Payload::Json(value),
            Decoded::Chunk(chunk) => Payload::Chunk(chunk),
        }
    }
}

/// An inbound unit tagged with the subscription it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub reference: Reference,
    pub payload: Payload,
}

impl Message {
    pub fn is_terminal(&self) -> bool {
        matches!(self.payload, Payload::End(_))
    }

    pub fn end_reason(&self) -> Option<&EndReason> {
        match &self.payload {
            Payload::End(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Receiving end of one subscription.
///
/// Yields messages in wire order and ends after the terminal message.
/// Dropping it counts as the subscriber going away: the read loop stops and
/// the connection is closed.
#[derive(Debug)]
pub struct Subscription {
    reference: Reference,
    rx: mpsc::Receiver<Message>,
    ended: bool,
}

impl Subscription {
    pub(crate) fn channel(reference: Reference, capacity: usize) -> (mpsc::Sender<Message>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                reference,
                rx,
                ended: false,
            },
        )
    }

    pub fn reference(&self) -> Reference {
        self.reference
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.next().await
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        let this = self.get_mut();
        if this.ended {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(message)) => {
                this.ended = message.is_terminal();
                Poll::Ready(Some(message))
            }
            Poll::Ready(None) => {
                this.ended = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Raw body bytes of a subscription's connection.
pub(crate) type ByteSource = BoxStream<'static, Result<Bytes, String>>;

const NO_WATCHDOG: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Read loop of one subscription.
pub(crate) struct Pump {
    reference: Reference,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    owner: Option<CancellationToken>,
    decoder: FrameDecoder,
    watchdog: Option<Duration>,
    refresh: bool,
}

impl Pump {
    pub(crate) fn new(
        reference: Reference,
        tx: mpsc::Sender<Message>,
        cancel: CancellationToken,
        mode: DemuxMode,
    ) -> Self {
        Self {
            reference,
            tx,
            cancel,
            owner: None,
            decoder: FrameDecoder::new(mode),
            watchdog: None,
            refresh: false,
        }
    }

    pub(crate) fn owner(mut self, owner: Option<CancellationToken>) -> Self {
        self.owner = owner;
        self
    }

    /// Arm the idle watchdog. With `refresh` every received read restarts
    /// it; without, `idle_timeout` bounds the whole stream.
    pub(crate) fn idle(mut self, idle_timeout: Option<Duration>, refresh: bool, default: Duration) -> Self {
        self.watchdog = match (idle_timeout, refresh) {
            (Some(timeout), _) => Some(timeout),
            (None, true) => Some(default),
            (None, false) => None,
        };
        self.refresh = refresh;
        self
    }

    /// Deliver decoded frames until the stream ends, returning why.
    pub(crate) async fn run(&mut self, mut source: ByteSource) -> EndReason {
        let watchdog = self.watchdog;
        let sleep = tokio::time::sleep(watchdog.unwrap_or(NO_WATCHDOG));
        tokio::pin!(sleep);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return EndReason::Finished,
                _ = self.tx.closed() => return EndReason::Finished,
                _ = &mut sleep, if watchdog.is_some() => return EndReason::IdleTimeout,
                next = source.next() => next,
            };

            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => return EndReason::ConnectionLost(e),
                None if self.decoder.is_at_boundary() => return EndReason::Closed,
                None => return EndReason::ConnectionLost("stream ended mid-frame".to_string()),
            };

            if self.refresh
                && let Some(timeout) = watchdog
            {
                sleep.as_mut().reset(Instant::now() + timeout);
            }

            let decoded = match self.decoder.feed(bytes) {
                Ok(decoded) => decoded,
                Err(e) => return EndReason::RemoteError(e.to_string()),
            };
            for item in decoded {
                let message = Message {
                    reference: self.reference,
                    payload: item.into(),
                };
                // Blocks while the subscriber's buffer is full, which stops
                // reading from the connection.
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return EndReason::Finished,
                    sent = self.tx.send(message) => {
                        if sent.is_err() {
                            return EndReason::Finished;
                        }
                    }
                }
                // Time spent waiting on the subscriber is not idleness.
                if self.refresh
                    && let Some(timeout) = watchdog
                {
                    sleep.as_mut().reset(Instant::now() + timeout);
                }
            }
        }
    }

    /// Deliver the terminal message. Consumes the pump so it happens once.
    pub(crate) async fn end(self, reason: EndReason) {
        tracing::debug!(reference = %self.reference, %reason, "subscription ended");
        let message = Message {
            reference: self.reference,
            payload: Payload::End(reason),
        };
        let owner_gone = self
            .owner
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled);
        if owner_gone {
            let _ = self.tx.try_send(message);
        } else {
            let _ = self.tx.send(message).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::demux::{Channel, encode_frame};
    use futures::channel::mpsc::{UnboundedSender, unbounded};
    use serde_json::json;

    fn source() -> (UnboundedSender<Result<Bytes, String>>, ByteSource) {
        let (feed, rx) = unbounded();
        (feed, rx.boxed())
    }

    fn pump_for(mode: DemuxMode, capacity: usize) -> (Pump, Subscription, CancellationToken) {
        let cancel = CancellationToken::new();
        let (tx, sub) = Subscription::channel(Reference::fresh(), capacity);
        (Pump::new(sub.reference(), tx, cancel.clone(), mode), sub, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_keeps_stream_alive_while_frames_arrive() {
        let (feed, source) = source();
        let (pump, mut sub, _) = pump_for(DemuxMode::Json, 16);
        let mut pump = pump.idle(Some(Duration::from_secs(5)), true, Duration::from_secs(5));

        let start = Instant::now();
        let producer = tokio::spawn(async move {
            for n in 0..5 {
                tokio::time::sleep(Duration::from_secs(4)).await;
                feed.unbounded_send(Ok(Bytes::from(format!("{{\"n\":{n}}}\n"))))
                    .unwrap();
            }
            feed
        });

        let reason = pump.run(source).await;
        assert_eq!(reason, EndReason::IdleTimeout);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(25), "ended early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(26), "ended late: {elapsed:?}");

        let _feed = producer.await.unwrap();
        for n in 0..5 {
            let message = sub.recv().await.unwrap();
            assert_eq!(message.payload, Payload::Json(json!({ "n": n })));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_without_refresh_bounds_the_stream() {
        let (feed, source) = source();
        let (pump, _sub, _) = pump_for(DemuxMode::Json, 16);
        let mut pump = pump.idle(Some(Duration::from_secs(5)), false, Duration::from_secs(5));

        let start = Instant::now();
        let producer = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;
                if feed.unbounded_send(Ok(Bytes::from_static(b"{}"))).is_err() {
                    break;
                }
            }
        });

        assert_eq!(pump.run(source).await, EndReason::IdleTimeout);
        assert!(start.elapsed() < Duration::from_secs(6));
        producer.abort();
    }

    #[tokio::test]
    async fn delivers_in_order_then_exactly_one_terminal() {
        let (feed, source) = source();
        let (mut pump, sub, _) = pump_for(DemuxMode::Framed, 16);
        let reference = sub.reference();

        let mut wire = encode_frame(Channel::Stdout, b"one").to_vec();
        wire.extend_from_slice(&encode_frame(Channel::Stderr, b"two"));
        wire.extend_from_slice(&encode_frame(Channel::Stdout, b"three"));
        // Split the wire at awkward offsets.
        for piece in [&wire[..5], &wire[5..14], &wire[14..]] {
            feed.unbounded_send(Ok(Bytes::copy_from_slice(piece))).unwrap();
        }
        drop(feed);

        let reason = pump.run(source).await;
        pump.end(reason).await;

        let messages: Vec<Message> = sub.collect().await;
        let payloads: Vec<_> = messages.iter().map(|m| m.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![
                Payload::Chunk(Chunk::new(Channel::Stdout, &b"one"[..])),
                Payload::Chunk(Chunk::new(Channel::Stderr, &b"two"[..])),
                Payload::Chunk(Chunk::new(Channel::Stdout, &b"three"[..])),
                Payload::End(EndReason::Closed),
            ]
        );
        assert!(messages.iter().all(|m| m.reference == reference));
        assert_eq!(messages.iter().filter(|m| m.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn stream_ending_mid_frame_is_connection_lost() {
        let (feed, source) = source();
        let (mut pump, _sub, _) = pump_for(DemuxMode::Framed, 4);

        let frame = encode_frame(Channel::Stdout, b"truncated");
        feed.unbounded_send(Ok(frame.slice(..10))).unwrap();
        drop(feed);

        assert!(matches!(pump.run(source).await, EndReason::ConnectionLost(_)));
    }

    #[tokio::test]
    async fn transport_error_is_connection_lost() {
        let (feed, source) = source();
        let (mut pump, _sub, _) = pump_for(DemuxMode::Json, 4);
        feed.unbounded_send(Err("connection reset".to_string())).unwrap();

        assert_eq!(
            pump.run(source).await,
            EndReason::ConnectionLost("connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn undecodable_json_is_remote_error() {
        let (feed, source) = source();
        let (mut pump, _sub, _) = pump_for(DemuxMode::Json, 4);
        feed.unbounded_send(Ok(Bytes::from_static(b"{\"a\": nope}"))).unwrap();

        assert!(matches!(pump.run(source).await, EndReason::RemoteError(_)));
    }

    #[tokio::test]
    async fn cancelled_pump_delivers_only_the_terminal() {
        let (feed, source) = source();
        let (mut pump, sub, cancel) = pump_for(DemuxMode::Json, 4);

        cancel.cancel();
        feed.unbounded_send(Ok(Bytes::from_static(b"{\"late\":true}\n")))
            .unwrap();

        let reason = pump.run(source).await;
        assert_eq!(reason, EndReason::Finished);
        pump.end(reason).await;

        let messages: Vec<Message> = sub.collect().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].end_reason(), Some(&EndReason::Finished));
    }

    #[tokio::test]
    async fn dropped_subscriber_stops_the_loop() {
        let (_feed, source) = source();
        let (mut pump, sub, _) = pump_for(DemuxMode::Json, 4);
        drop(sub);

        assert_eq!(pump.run(source).await, EndReason::Finished);
    }

    #[tokio::test]
    async fn owner_gone_terminal_never_blocks() {
        let (feed, source) = source();
        let (pump, _sub, _) = pump_for(DemuxMode::Json, 1);
        let owner = CancellationToken::new();
        let mut pump = pump.owner(Some(owner.clone()));

        feed.unbounded_send(Ok(Bytes::from_static(b"{}"))).unwrap();
        drop(feed);
        assert_eq!(pump.run(source).await, EndReason::Closed);

        // Buffer is full and nobody reads; the terminal is dropped.
        owner.cancel();
        pump.end(EndReason::Finished).await;
    }

    #[tokio::test(start_paused = true)]
    async fn slow_subscriber_is_not_mistaken_for_idle_stream() {
        let (feed, source) = source();
        let (pump, mut sub, _) = pump_for(DemuxMode::Json, 1);
        let mut pump = pump.idle(Some(Duration::from_secs(5)), true, Duration::from_secs(5));
        for n in 0..3 {
            feed.unbounded_send(Ok(Bytes::from(format!("{{\"n\":{n}}}\n"))))
                .unwrap();
        }
        drop(feed);

        let handle = tokio::spawn(async move {
            let reason = pump.run(source).await;
            pump.end(reason).await;
        });
        tokio::time::sleep(Duration::from_secs(6)).await;

        let mut seen = Vec::new();
        while let Some(message) = sub.recv().await {
            seen.push(message.payload);
        }
        handle.await.unwrap();
        assert_eq!(
            seen,
            vec![
                Payload::Json(json!({ "n": 0 })),
                Payload::Json(json!({ "n": 1 })),
                Payload::Json(json!({ "n": 2 })),
                Payload::End(EndReason::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn full_buffer_blocks_the_read_loop() {
        let (feed, source) = source();
        let (mut pump, mut sub, _) = pump_for(DemuxMode::Json, 1);
        for n in 0..3 {
            feed.unbounded_send(Ok(Bytes::from(format!("{{\"n\":{n}}}\n"))))
                .unwrap();
        }
        drop(feed);

        let handle = tokio::spawn(async move {
            let reason = pump.run(source).await;
            pump.end(reason).await;
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!handle.is_finished());

        let mut seen = Vec::new();
        while let Some(message) = sub.recv().await {
            seen.push(message.payload);
        }
        handle.await.unwrap();
        assert_eq!(
            seen,
            vec![
                Payload::Json(json!({ "n": 0 })),
                Payload::Json(json!({ "n": 1 })),
                Payload::Json(json!({ "n": 2 })),
                Payload::End(EndReason::Closed),
            ]
        );
    }
}

// ABOUTME: Decoder for the engine's stdout/stderr multiplexed stream format.
// ABOUTME: Incremental state machine that tolerates headers and payloads split across reads.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of a multiplex frame header: channel byte, three padding bytes,
/// big-endian u32 payload length.
pub const HEADER_LEN: usize = 8;

/// Logical channel of an attach/exec/logs stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Stdin,
    Stdout,
    Stderr,
}

impl Channel {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Channel::Stdin),
            1 => Some(Channel::Stdout),
            2 => Some(Channel::Stderr),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Channel::Stdin => 0,
            Channel::Stdout => 1,
            Channel::Stderr => 2,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Stdin => f.write_str("stdin"),
            Channel::Stdout => f.write_str("stdout"),
            Channel::Stderr => f.write_str("stderr"),
        }
    }
}

/// A decoded piece of output on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub channel: Channel,
    pub bytes: Bytes,
}

impl Chunk {
    pub fn new(channel: Channel, bytes: impl Into<Bytes>) -> Self {
        Self {
            channel,
            bytes: bytes.into(),
        }
    }
}

/// How the inbound bytes of a subscription are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DemuxMode {
    /// Session has a pseudo-terminal: bytes pass through on stdout.
    Raw,
    /// No pseudo-terminal: 8-byte headers interleave stdout and stderr.
    Framed,
    /// Not demultiplexed; the body is a sequence of JSON documents.
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DemuxError {
    #[error("invalid stream type {0} in frame header")]
    InvalidChannel(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingHeader,
    AwaitingPayload { channel: Channel, remaining: usize },
}

/// Incremental decoder for one subscription's byte stream.
///
/// Feed it transport reads in order; it buffers partial headers and
/// payloads between calls and yields each frame only once it is complete.
#[derive(Debug)]
pub struct Demuxer {
    raw: bool,
    state: State,
    header: BytesMut,
    payload: BytesMut,
}

impl Demuxer {
    /// `Raw` passes bytes through; `Framed` (and `Json`, which never reaches
    /// the demuxer) parse frame headers.
    pub fn new(mode: DemuxMode) -> Self {
        Self {
            raw: mode == DemuxMode::Raw,
            state: State::AwaitingHeader,
            header: BytesMut::with_capacity(HEADER_LEN),
            payload: BytesMut::new(),
        }
    }

    /// Consume one transport read and return every frame it completed.
    pub fn feed(&mut self, mut input: Bytes) -> Result<Vec<Chunk>, DemuxError> {
        if self.raw {
            if input.is_empty() {
                return Ok(Vec::new());
            }
            return Ok(vec![Chunk::new(Channel::Stdout, input)]);
        }

        let mut out = Vec::new();
        loop {
            match self.state {
                State::AwaitingHeader => {
                    let wanted = HEADER_LEN - self.header.len();
                    let take = wanted.min(input.len());
                    self.header.put(input.split_to(take));
                    if self.header.len() < HEADER_LEN {
                        break;
                    }

                    let mut header = self.header.split().freeze();
                    let channel_byte = header.get_u8();
                    let channel = Channel::from_byte(channel_byte)
                        .ok_or(DemuxError::InvalidChannel(channel_byte))?;
                    header.advance(3);
                    let remaining = header.get_u32() as usize;
                    self.payload.reserve(remaining);
                    self.state = State::AwaitingPayload { channel, remaining };
                }
                State::AwaitingPayload { channel, remaining } => {
                    let take = remaining.min(input.len());
                    self.payload.put(input.split_to(take));
                    let remaining = remaining - take;
                    if remaining > 0 {
                        self.state = State::AwaitingPayload { channel, remaining };
                        break;
                    }
                    out.push(Chunk::new(channel, self.payload.split().freeze()));
                    self.state = State::AwaitingHeader;
                }
            }

            if input.is_empty() && self.state == State::AwaitingHeader {
                break;
            }
        }
        Ok(out)
    }

    /// True when no partial header or payload is buffered.
    pub fn is_at_boundary(&self) -> bool {
        self.state == State::AwaitingHeader && self.header.is_empty()
    }
}

/// Encode one frame in the multiplexed wire format.
pub fn encode_frame(channel: Channel, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(channel.as_byte());
    buf.put_bytes(0, 3);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

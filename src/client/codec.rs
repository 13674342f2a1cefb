// ABOUTME: Turns a subscription's raw byte stream into deliverable payloads.
// ABOUTME: JSON document streams (events, stats, progress) or demultiplexed output chunks.

use super::demux::{Chunk, DemuxError, DemuxMode, Demuxer};
use bytes::{Buf, Bytes, BytesMut};
use serde_json::Value;

/// Incremental decoder for a stream of concatenated JSON documents.
///
/// The engine separates documents with newlines, but a document may still be
/// split across reads; incomplete trailing input is kept for the next call.
#[derive(Debug, Default)]
pub struct JsonDecoder {
    buf: BytesMut,
}

impl JsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, input: &[u8]) -> Result<Vec<Value>, serde_json::Error> {
        self.buf.extend_from_slice(input);

        let mut values = Vec::new();
        let consumed = {
            let mut stream = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
            loop {
                match stream.next() {
                    Some(Ok(value)) => values.push(value),
                    Some(Err(e)) if e.is_eof() => break,
                    Some(Err(e)) => return Err(e),
                    None => break,
                }
            }
            stream.byte_offset()
        };
        self.buf.advance(consumed);
        Ok(values)
    }

    /// True when nothing but whitespace is buffered.
    pub fn is_at_boundary(&self) -> bool {
        self.buf.iter().all(u8::is_ascii_whitespace)
    }
}

/// A decoded unit ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Json(Value),
    Chunk(Chunk),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Demux(#[from] DemuxError),

    #[error("malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-subscription decoder selected by [`DemuxMode`].
#[derive(Debug)]
pub enum FrameDecoder {
    Json(JsonDecoder),
    Output(Demuxer),
}

impl FrameDecoder {
    pub fn new(mode: DemuxMode) -> Self {
        match mode {
            DemuxMode::Json => FrameDecoder::Json(JsonDecoder::new()),
            DemuxMode::Raw | DemuxMode::Framed => FrameDecoder::Output(Demuxer::new(mode)),
        }
    }

    pub fn feed(&mut self, input: Bytes) -> Result<Vec<Decoded>, DecodeError> {
        match self {
            FrameDecoder::Json(decoder) => Ok(decoder
                .feed(&input)?
                .into_iter()
                .map(Decoded::Json)
                .collect()),
            FrameDecoder::Output(demuxer) => Ok(demuxer
                .feed(input)?
                .into_iter()
                .map(Decoded::Chunk)
                .collect()),
        }
    }

    pub fn is_at_boundary(&self) -> bool {
        match self {
            FrameDecoder::Json(decoder) => decoder.is_at_boundary(),
            FrameDecoder::Output(demuxer) => demuxer.is_at_boundary(),
        }
    }
}

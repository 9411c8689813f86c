use bytes::{Buf, BytesMut};
use serde_json::Value;
use thiserror::Error;
use tracing::{trace, warn};

use crate::cursor::{self, HeaderBlock};

pub const DEFAULT_BOUNDARY: &str = "boundary";

/// A single decoded part of the multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub payload: Value,
    /// Bytes spanned by the part: boundary, headers and body.
    pub consumed: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("stream ended inside a frame ({pending} bytes pending)")]
    Truncated { pending: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames: u64,
    pub skipped: u64,
    pub bytes_in: u64,
}

/// Stateful multipart parser owned by exactly one in-flight query.
#[derive(Debug)]
pub struct FrameDecoder {
    boundary: Vec<u8>,
    buffer: BytesMut,
    pending_frame: bool,
    stats: DecoderStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_boundary(DEFAULT_BOUNDARY)
    }

    pub fn with_boundary(name: &str) -> Self {
        Self {
            boundary: format!("--{name}\r\n").into_bytes(),
            buffer: BytesMut::new(),
            pending_frame: false,
            stats: DecoderStats::default(),
        }
    }

    /// The full delimiter token, including the leading dashes and CRLF.
    pub fn boundary(&self) -> &[u8] {
        &self.boundary
    }

    /// Number of bytes carried over to the next call.
    pub fn retained(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// True when a boundary has been seen but its part has not fully arrived.
    pub fn has_pending_frame(&self) -> bool {
        self.pending_frame
    }

    /// Feeds `chunk` and invokes `on_frame` for every part completed by it.
    ///
    /// Parts whose body is not valid JSON are logged and dropped; decoding
    /// carries on with the next boundary.
    pub fn process_chunk<F>(&mut self, chunk: &[u8], mut on_frame: F)
    where
        F: FnMut(Frame),
    {
        self.buffer.extend_from_slice(chunk);
        self.stats.bytes_in = self.stats.bytes_in.saturating_add(chunk.len() as u64);
        self.pending_frame = false;

        let mut pos = 0;
        loop {
            let Some(boundary_at) = cursor::find(&self.buffer, &self.boundary, pos) else {
                // A boundary may be split across reads; keep just enough of the tail.
                let keep = self.boundary.len() - 1;
                pos = pos.max(self.buffer.len().saturating_sub(keep));
                break;
            };

            let headers_at = boundary_at + self.boundary.len();
            let (content_length, body_start) =
                match cursor::parse_header_block(&self.buffer, headers_at) {
                    HeaderBlock::Incomplete => {
                        pos = boundary_at;
                        self.pending_frame = true;
                        break;
                    }
                    HeaderBlock::Complete {
                        content_length,
                        body_start,
                    } => (content_length, body_start),
                };

            let Some(body_end) = content_length.and_then(|len| body_start.checked_add(len))
            else {
                warn!(
                    target: "beach_query::decoder",
                    offset = boundary_at,
                    "multipart part without a usable content-length; skipping headers"
                );
                self.stats.skipped += 1;
                pos = body_start;
                continue;
            };

            if body_end > self.buffer.len() {
                pos = boundary_at;
                self.pending_frame = true;
                break;
            }

            match serde_json::from_slice::<Value>(&self.buffer[body_start..body_end]) {
                Ok(payload) => {
                    self.stats.frames += 1;
                    trace!(
                        target: "beach_query::decoder",
                        bytes = body_end - body_start,
                        "decoded multipart frame"
                    );
                    on_frame(Frame {
                        payload,
                        consumed: body_end - boundary_at,
                    });
                }
                Err(err) => {
                    self.stats.skipped += 1;
                    warn!(
                        target: "beach_query::decoder",
                        error = %err,
                        bytes = body_end - body_start,
                        "dropping multipart frame with invalid json"
                    );
                }
            }
            pos = body_end;
        }

        self.buffer.advance(pos);
    }

    /// Collecting variant of [`FrameDecoder::process_chunk`].
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        self.process_chunk(chunk, |frame| frames.push(frame));
        frames
    }

    /// Checks the decoder state once the transport reports end of stream.
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.pending_frame {
            return Err(DecodeError::Truncated {
                pending: self.buffer.len(),
            });
        }
        Ok(())
    }
}

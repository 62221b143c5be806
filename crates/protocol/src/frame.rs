//! Sentinel framing of the command input stream.
//!
//! Commands are separated by [`SENTINEL`]; the sentinel may arrive in the
//! middle of a line or be split across two reads. The codec keeps the
//! unterminated tail in its buffer until the rest of the sentinel shows up.

use std::{io, time::Duration};

use {
    bytes::{Buf, BytesMut},
    tokio::io::{AsyncRead, AsyncReadExt},
    tokio_util::codec::Decoder,
    tracing::{debug, warn},
};

use crate::SENTINEL;

const READ_CHUNK_BYTES: usize = 8 * 1024;
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Splits a byte buffer into trimmed, non-empty frames at each sentinel.
#[derive(Debug, Default, Clone, Copy)]
pub struct SentinelCodec {
    /// Buffer offset already known not to contain a sentinel start.
    scanned: usize,
}

impl SentinelCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for SentinelCodec {
    type Error = io::Error;
    type Item = String;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let needle = SENTINEL.as_bytes();
        loop {
            let start = self.scanned.min(src.len());
            let Some(offset) = find(&src[start..], needle) else {
                self.scanned = src.len().saturating_sub(needle.len() - 1);
                return Ok(None);
            };

            let raw = src.split_to(start + offset);
            src.advance(needle.len());
            self.scanned = 0;

            let text = match String::from_utf8(raw.to_vec()) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, bytes = raw.len(), "dropping frame with invalid UTF-8");
                    continue;
                },
            };
            let frame = text.trim();
            if frame.is_empty() {
                continue;
            }
            return Ok(Some(frame.to_owned()));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if !buf.is_empty() {
            debug!(bytes = buf.len(), "discarding unterminated input at end of stream");
            buf.clear();
        }
        self.scanned = 0;
        Ok(None)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Pulls frames out of an async byte stream.
///
/// End of input finishes the reader; any other read error is logged and
/// reading resumes, so a single bad read never stops command processing.
pub struct FrameReader<R> {
    reader: R,
    buffer: BytesMut,
    codec: SentinelCodec,
    finished: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(READ_CHUNK_BYTES),
            codec: SentinelCodec::new(),
            finished: false,
        }
    }

    /// Next complete frame, or `None` once the input is exhausted.
    pub async fn next_frame(&mut self) -> Option<String> {
        loop {
            if self.finished {
                return None;
            }

            match self.codec.decode(&mut self.buffer) {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {},
                Err(e) => warn!(error = %e, "failed to decode command frame"),
            }

            self.buffer.reserve(READ_CHUNK_BYTES);
            match self.reader.read_buf(&mut self.buffer).await {
                Ok(0) => {
                    self.finished = true;
                    debug!("command input reached end of stream");
                    return self.codec.decode_eof(&mut self.buffer).ok().flatten();
                },
                Ok(_) => {},
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    warn!(error = %e, "failed to read command input");
                    tokio::time::sleep(READ_ERROR_BACKOFF).await;
                },
            }
        }
    }
}

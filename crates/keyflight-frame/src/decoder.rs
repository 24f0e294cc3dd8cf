use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::codec::{FrameConfig, COMMAND_SEPARATOR};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 256;

/// Incrementally reassembles raw byte chunks into complete frames.
///
/// The receive buffer is owned by the decoder and only mutated through
/// [`FrameDecoder::extend`], [`FrameDecoder::next_frame`] and
/// [`FrameDecoder::feed`]. Frames are yielded trimmed of surrounding
/// whitespace; blank frames (stray separators, newlines) are dropped.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    scanned: usize,
    config: FrameConfig,
}

impl FrameDecoder {
    /// Create a decoder with an unbounded receive buffer.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a decoder with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            scanned: 0,
            config,
        }
    }

    /// Append a chunk and return every frame it completes, in order.
    ///
    /// Unconsumed bytes (a partial frame) are kept for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.extend(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Append a chunk without scanning it.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if the buffer holds one.
    ///
    /// With a configured cap, a remainder that outgrows it without a
    /// separator is discarded and reported as [`FrameError::BufferOverflow`].
    pub fn next_frame(&mut self) -> Result<Option<String>> {
        if let Some(frame) = split_frame(&mut self.buf, &mut self.scanned) {
            return Ok(Some(frame));
        }

        if let Some(max) = self.config.max_buffered {
            if self.buf.len() > max {
                let size = self.buf.len();
                self.clear();
                return Err(FrameError::BufferOverflow { size, max });
            }
        }
        Ok(None)
    }

    /// Bytes currently held (a partial frame).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any buffered partial frame.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Split the next non-blank frame off the front of `buf`.
///
/// `scanned` remembers how far the buffer is known to hold no separator, so
/// repeated calls on a growing buffer never rescan old bytes.
pub(crate) fn split_frame(buf: &mut BytesMut, scanned: &mut usize) -> Option<String> {
    loop {
        let start = (*scanned).min(buf.len());
        let Some(pos) = buf[start..]
            .iter()
            .position(|&b| b == COMMAND_SEPARATOR as u8)
        else {
            *scanned = buf.len();
            return None;
        };

        let raw = buf.split_to(start + pos);
        buf.advance(1);
        *scanned = 0;

        let text = String::from_utf8_lossy(&raw);
        let frame = text.trim();
        if frame.is_empty() {
            trace!("discarding blank frame");
            continue;
        }
        return Some(frame.to_string());
    }
}

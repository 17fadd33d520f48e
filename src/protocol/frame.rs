//! Delimiter framing over a raw byte stream.
//!
//! # Wire Format
//!
//! ```text
//! request:  START_MARKER | payload | END_MARKER
//! response:                payload | END_MARKER
//! ```
//!
//! Payloads are compact JSON. Both markers begin with the record separator
//! byte `0x1E`, which compact JSON never emits unescaped, so any `0x1E`
//! inside a frame body is the start of a marker. The decoder scans an
//! accumulating buffer for markers instead of comparing whole reads, so it
//! is indifferent to how the transport splits or coalesces chunks.

// ============================================================================
// Imports
// ============================================================================

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{trace, warn};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Leading byte shared by both markers.
const MARKER_LEAD: u8 = 0x1e;

/// Marks the beginning of a request frame.
pub const START_MARKER: &[u8] = b"\x1e$QUERY$";

/// Marks the end of any frame.
pub const END_MARKER: &[u8] = b"\x1e$END$";

/// Largest payload accepted by default (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// ============================================================================
// FrameKind
// ============================================================================

/// Which side of the conversation a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Client to server; opened by [`START_MARKER`].
    Request,
    /// Server to client; payload begins immediately.
    Response,
}

// ============================================================================
// FrameDecoder
// ============================================================================

/// Incremental frame decoder.
///
/// Feed raw reads with [`extend`](Self::extend) and drain complete payloads
/// with [`decode`](Self::decode). Several frames may be buffered at once;
/// they are returned in arrival order.
///
/// After an error the decoder state is undefined and the stream should be
/// dropped.
#[derive(Debug)]
pub struct FrameDecoder {
    /// Frame kind being decoded.
    kind: FrameKind,
    /// Bytes not yet consumed.
    buffer: Vec<u8>,
    /// Inside a frame body.
    started: bool,
    /// Body bytes already scanned for a marker.
    scanned: usize,
    /// Payload size limit.
    max_len: usize,
}

impl FrameDecoder {
    /// Creates a decoder for inbound requests (server side).
    #[inline]
    #[must_use]
    pub fn request() -> Self {
        Self::new(FrameKind::Request, MAX_FRAME_LEN)
    }

    /// Creates a decoder for inbound responses (client side).
    #[inline]
    #[must_use]
    pub fn response() -> Self {
        Self::new(FrameKind::Response, MAX_FRAME_LEN)
    }

    /// Creates a decoder with an explicit payload limit.
    #[must_use]
    pub fn new(kind: FrameKind, max_len: usize) -> Self {
        Self {
            kind,
            buffer: Vec::new(),
            started: kind == FrameKind::Response,
            scanned: 0,
            max_len,
        }
    }

    /// Returns `true` while a request body is being accumulated.
    ///
    /// Always `true` for response decoders.
    #[inline]
    #[must_use]
    pub fn in_frame(&self) -> bool {
        self.started
    }

    /// Number of buffered, unconsumed bytes.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends bytes read from the stream.
    #[inline]
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete payload, if one is buffered.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] on a start marker or stray marker byte inside a body
    /// - [`Error::FrameTooLarge`] if the body outgrows the limit
    pub fn decode(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.started && !self.seek_start() {
            return Ok(None);
        }

        let Some(rel) = self.buffer[self.scanned..]
            .iter()
            .position(|&b| b == MARKER_LEAD)
        else {
            self.scanned = self.buffer.len();
            self.check_len(self.buffer.len())?;
            return Ok(None);
        };

        let at = self.scanned + rel;
        let tail = &self.buffer[at..];

        if tail.starts_with(END_MARKER) {
            self.check_len(at)?;
            let payload: Vec<u8> = self.buffer.drain(..at).collect();
            self.buffer.drain(..END_MARKER.len());
            self.scanned = 0;
            self.started = self.kind == FrameKind::Response;
            trace!(kind = ?self.kind, len = payload.len(), "Frame decoded");
            return Ok(Some(payload));
        }

        if tail.starts_with(START_MARKER) {
            return Err(Error::protocol("start marker inside an unterminated frame"));
        }

        // Marker split across reads.
        if END_MARKER.starts_with(tail) || START_MARKER.starts_with(tail) {
            self.scanned = at;
            self.check_len(at)?;
            return Ok(None);
        }

        Err(Error::protocol("stray marker byte inside frame payload"))
    }

    /// Consumes bytes up to and including the next start marker.
    ///
    /// Returns `false` if no complete start marker is buffered yet.
    fn seek_start(&mut self) -> bool {
        if let Some(pos) = find(&self.buffer, START_MARKER) {
            if pos > 0 {
                warn!(discarded = pos, "Discarding bytes before request start marker");
            }
            self.buffer.drain(..pos + START_MARKER.len());
            self.started = true;
            self.scanned = 0;
            trace!("Request start marker received");
            return true;
        }

        // Keep only what could still grow into a start marker.
        let keep = START_MARKER.len() - 1;
        if self.buffer.len() > keep {
            let cut = self.buffer.len() - keep;
            warn!(discarded = cut, "Discarding bytes outside a request frame");
            self.buffer.drain(..cut);
        }
        false
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_len {
            return Err(Error::frame_too_large(len, self.max_len));
        }
        Ok(())
    }
}

// ============================================================================
// Writers
// ============================================================================

/// Writes one frame and flushes.
///
/// Requests go out as three writes (start marker, payload, end marker).
///
/// # Errors
///
/// Returns [`Error::Io`] if any write fails.
pub async fn write_frame<W>(writer: &mut W, kind: FrameKind, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if kind == FrameKind::Request {
        writer.write_all(START_MARKER).await?;
    }
    writer.write_all(payload).await?;
    writer.write_all(END_MARKER).await?;
    writer.flush().await?;

    trace!(?kind, len = payload.len(), "Frame written");
    Ok(())
}

/// Finds the first occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ============================================================================
// Tests
// ============================================================================

//! Line framer for agent output streams.
//!
//! Agent output arrives in chunks with no line alignment: a chunk may end
//! mid-line, carry several lines, or split a multi-byte character. The
//! [`LineFramer`] reassembles those chunks into complete lines, stripping
//! carriage returns left behind by pseudo-terminal output.
//!
//! The framer operates on bytes and only converts to UTF-8 once a line is
//! complete, so a character split across two chunks survives intact.
//!
//! # Usage
//!
//! Feed chunks with [`LineFramer::push`] and flush the residual fragment
//! with [`LineFramer::finish`] when the stream ends. The framer also
//! implements [`tokio_util::codec::Decoder`] so it can drive a
//! [`FramedRead`](tokio_util::codec::FramedRead) directly:
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use agent_relay::stream::framer::LineFramer;
//!
//! let lines = FramedRead::new(child_stderr, LineFramer::new());
//! ```

use std::collections::VecDeque;

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::warn;

use crate::{AppError, Result};

/// Maximum buffered length of a single line: 1 MiB.
///
/// A fragment that grows past this limit without a newline is discarded
/// and framing resumes after the next newline.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Reassembles raw output chunks into complete, `\r`-free lines.
///
/// At most one incomplete fragment is held at any time.
#[derive(Debug)]
pub struct LineFramer {
    partial: BytesMut,
    max_length: usize,
    /// Set while skipping the tail of an over-long line.
    discarding: bool,
    /// Lines framed but not yet handed out through [`Decoder::decode`].
    ready: VecDeque<String>,
}

impl LineFramer {
    /// Create a framer with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a framer with a custom maximum line length.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            partial: BytesMut::new(),
            max_length: max_length.max(1),
            discarding: false,
            ready: VecDeque::new(),
        }
    }

    /// Consume one chunk and return every line it completes, in order.
    ///
    /// The trailing piece after the last newline is retained (even when
    /// empty) until a later chunk terminates it. Empty chunks are ignored.
    /// A line longer than the limit is dropped however it was chunked.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        if chunk.is_empty() {
            return lines;
        }

        // n newlines split the chunk into n + 1 segments; all but the last
        // are terminated.
        let mut segments = chunk.split(|&byte| byte == b'\n').peekable();
        while let Some(segment) = segments.next() {
            self.extend_line(segment);
            if segments.peek().is_some() {
                lines.extend(self.take_line());
            }
        }

        lines
    }

    /// Flush the residual fragment at end of stream.
    ///
    /// Returns `None` when the fragment is empty or belonged to a discarded
    /// over-long line.
    pub fn finish(&mut self) -> Option<String> {
        self.take_line().filter(|line| !line.is_empty())
    }

    /// Append bytes of the current line, switching to discard mode once
    /// it outgrows the limit.
    fn extend_line(&mut self, segment: &[u8]) {
        if self.discarding {
            return;
        }
        self.partial
            .extend(segment.iter().copied().filter(|&byte| byte != b'\r'));
        if self.partial.len() > self.max_length {
            warn!(
                buffered = self.partial.len(),
                max = self.max_length,
                "line framer: line too long, discarding until next newline"
            );
            self.partial.clear();
            self.discarding = true;
        }
    }

    /// End the current line; `None` when it was discarded.
    fn take_line(&mut self) -> Option<String> {
        let line = self.partial.split();
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Number of bytes currently held in the partial fragment.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.partial.len()
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineFramer {
    type Item = String;
    type Error = AppError;

    /// Frame everything buffered in `src` and yield the next complete line.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if !src.is_empty() {
            let chunk = src.split();
            let lines = self.push(&chunk);
            self.ready.extend(lines);
        }
        Ok(self.ready.pop_front())
    }

    /// Yield remaining lines, then the residual fragment, at end of stream.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        Ok(self.finish())
    }
}

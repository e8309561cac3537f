//! Incremental newline framing for the worker's byte streams.
//!
//! Writes from the worker arrive in arbitrary chunks: one chunk may carry
//! several messages, or a single message may be split across many chunks (or
//! in the middle of a UTF-8 sequence). [`LineFramer`] buffers raw bytes and
//! yields one decoded frame per newline-terminated segment, keeping the
//! unterminated tail for the next chunk.

use std::collections::VecDeque;
use std::mem;
use std::str;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ProtocolError;
use crate::message::{Message, encode_line};

const READ_CHUNK: usize = 8 * 1024;

/// Outcome of decoding one segment.
pub type Frame = Result<Message, ProtocolError>;

/// Push-style decoder over an accumulating byte buffer.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    scanned: usize,
}

impl LineFramer {
    /// Creates an empty framer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
        }
    }

    /// Appends `chunk` and returns an iterator over every completed frame.
    ///
    /// Frames left unconsumed when the iterator is dropped stay buffered and
    /// are yielded by the next call to `push`, as is the unterminated tail.
    pub fn push(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);
        Frames { framer: self }
    }

    /// Flushes the unterminated tail, if it holds anything but whitespace.
    pub fn finish(&mut self) -> Option<Frame> {
        self.scanned = 0;
        let tail = mem::take(&mut self.buffer);
        decode_segment(&tail)
    }

    /// Number of bytes waiting for a terminating newline.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let unscanned = self.buffer.get(self.scanned..)?;
            let Some(offset) = unscanned.iter().position(|byte| *byte == b'\n') else {
                self.scanned = self.buffer.len();
                return None;
            };

            let end = self.scanned + offset;
            let mut segment: Vec<u8> = self.buffer.drain(..=end).collect();
            segment.pop();
            self.scanned = 0;

            if let Some(frame) = decode_segment(&segment) {
                return Some(frame);
            }
        }
    }
}

/// Draining iterator returned by [`LineFramer::push`].
#[derive(Debug)]
pub struct Frames<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_frame()
    }
}

/// Lazy frame stream over an asynchronous reader.
#[derive(Debug)]
pub struct FramedReader<R> {
    reader: R,
    framer: LineFramer,
    pending: VecDeque<Frame>,
    chunk: Vec<u8>,
    done: bool,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    /// Wraps `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            framer: LineFramer::new(),
            pending: VecDeque::new(),
            chunk: vec![0_u8; READ_CHUNK],
            done: false,
        }
    }

    /// Returns the next frame, or `None` once the stream has ended.
    ///
    /// A final unterminated segment is decoded at end of stream. A read
    /// error is yielded once and ends the stream.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            if self.done {
                return None;
            }

            match self.reader.read(&mut self.chunk).await {
                Ok(0) => {
                    self.done = true;
                    return self.framer.finish();
                }
                Ok(read) => {
                    let bytes = self.chunk.get(..read).unwrap_or_default();
                    self.pending.extend(self.framer.push(bytes));
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(ProtocolError::Io(err.into())));
                }
            }
        }
    }

    /// Consumes the stream, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Encodes one message as a newline-terminated JSON line.
///
/// # Errors
///
/// Returns [`ProtocolError`] when the message cannot be serialised.
pub fn encode(message: &Message) -> Result<String, ProtocolError> {
    encode_line(message)
}

fn decode_segment(segment: &[u8]) -> Option<Frame> {
    let text = match str::from_utf8(segment) {
        Ok(text) => text,
        Err(err) => {
            let lossy = String::from_utf8_lossy(segment).trim().to_owned();
            return Some(Err(ProtocolError::malformed(
                lossy,
                format!("invalid UTF-8: {err}"),
            )));
        }
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(Message::from_line(trimmed))
}

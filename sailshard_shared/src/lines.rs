//! Bounded line framing.
//!
//! [`LineCodec`] splits a byte stream on `\n`. Peers are untrusted: invalid
//! UTF-8 is replaced rather than rejected, and a line longer than the
//! configured limit is discarded up to its terminator instead of growing the
//! buffer without bound. Neither case ends the stream.

use bytes::{Buf, BytesMut};
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};

/// Default maximum line length in bytes, terminator excluded.
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

/// A framed reader producing [`Line`]s. Read it with `StreamExt::next`,
/// which is cancel safe: partial lines stay in the frame buffer.
pub type LineReader<R> = FramedRead<R, LineCodec>;

/// Wraps `inner` in a [`LineCodec`] limited to `max_len` bytes per line.
pub fn line_reader<R: AsyncRead>(inner: R, max_len: usize) -> LineReader<R> {
    FramedRead::new(inner, LineCodec::new(max_len))
}

/// One unit produced by [`LineCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A complete line without its `\n` (or `\r\n`) terminator.
    Text(String),
    /// A line over the limit; its bytes were dropped.
    Oversized { discarded: usize },
}

/// Newline decoder with a per-line length limit.
///
/// The limit applies to the line content after the terminator and an
/// optional trailing `\r` are removed. A final fragment without a
/// terminator is returned at end of stream.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_len: usize,
    /// Bytes of `buf` already scanned without finding `\n`.
    next_index: usize,
    /// Set while skipping the rest of an oversized line.
    discarding: bool,
    discarded: usize,
}

impl LineCodec {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            next_index: 0,
            discarding: false,
            discarded: 0,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    fn take_oversized(&mut self) -> Line {
        self.discarding = false;
        Line::Oversized {
            discarded: std::mem::take(&mut self.discarded),
        }
    }

    fn finish(&self, mut line: BytesMut) -> Line {
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        if line.len() > self.max_len {
            return Line::Oversized {
                discarded: line.len(),
            };
        }
        Line::Text(String::from_utf8_lossy(&line).into_owned())
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Line>, Self::Error> {
        let newline = src[self.next_index..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| i + self.next_index);

        if self.discarding {
            return Ok(match newline {
                Some(i) => {
                    self.discarded += i;
                    src.advance(i + 1);
                    self.next_index = 0;
                    Some(self.take_oversized())
                }
                None => {
                    self.discarded += src.len();
                    src.clear();
                    self.next_index = 0;
                    None
                }
            });
        }

        match newline {
            Some(i) => {
                let mut line = src.split_to(i + 1);
                line.truncate(i);
                self.next_index = 0;
                Ok(Some(self.finish(line)))
            }
            // One byte of slack: it may be the `\r` of a `\r\n` still in flight.
            None if src.len() > self.max_len.saturating_add(1) => {
                self.discarding = true;
                self.discarded = src.len();
                src.clear();
                self.next_index = 0;
                Ok(None)
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Line>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if self.discarding {
            self.discarded += src.len();
            src.clear();
            self.next_index = 0;
            return Ok(Some(self.take_oversized()));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split_to(src.len());
        self.next_index = 0;
        Ok(Some(self.finish(rest)))
    }
}

//! Peekable byte streams.
//!
//! Every layer of the decode pipeline (the raw source and each stacked
//! filter) is exposed to the layer above as an [`Upstream`]: a stream that
//! can show bytes without consuming them. Peeking is what makes detection
//! possible, and it is also what keeps a RETRY harmless: bytes that were
//! fetched before a transient failure stay buffered until someone consumes
//! them.

use crate::error::{ArchiveError, Result};
use crate::io::Whence;

/// Preferred refill size when a caller only needs a few bytes.
pub const REFILL_SIZE: usize = 16 * 1024;

/// A peekable, consumable byte stream.
///
/// Implementors must uphold one rule: a call that returns `Err` has not
/// consumed anything. Operations that can make partial progress
/// ([`Upstream::skip`]) do a single step per call and report it.
pub trait Upstream {
    /// Show at least `min` bytes without consuming them. Fewer bytes are
    /// returned only at end of stream.
    fn peek(&mut self, min: usize) -> Result<&[u8]>;

    /// Consume `n` bytes previously returned by [`Upstream::peek`].
    fn consume(&mut self, n: usize);

    /// Skip forward by up to `n` bytes in one step. Returns 0 only at end of
    /// stream.
    fn skip(&mut self, n: u64) -> Result<u64>;

    /// Number of bytes consumed so far.
    fn position(&self) -> u64;

    /// Whether [`Upstream::seek`] is available.
    fn seekable(&self) -> bool {
        false
    }

    /// Reposition the stream. Buffered bytes are discarded.
    fn seek(&mut self, _offset: i64, _whence: Whence) -> Result<u64> {
        Err(ArchiveError::NotSeekable)
    }

    /// Copy up to `buf.len()` bytes out of the stream.
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let available = self.peek(1)?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }

    /// Take exactly `n` bytes, or fail without consuming anything.
    fn take_vec(&mut self, n: usize) -> Result<Vec<u8>> {
        let available = self.peek(n)?;
        if available.len() < n {
            return Err(ArchiveError::unexpected_eof((n - available.len()) as u64));
        }
        let out = available[..n].to_vec();
        self.consume(n);
        Ok(out)
    }

    /// True once no further byte can be produced.
    fn at_eof(&mut self) -> Result<bool> {
        Ok(self.peek(1)?.is_empty())
    }
}

/// Buffer backing a peekable layer.
#[derive(Debug, Default)]
pub struct PeekBuf {
    data: Vec<u8>,
    start: usize,
    eof: bool,
}

impl PeekBuf {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// The buffered, unconsumed bytes.
    pub fn available(&self) -> &[u8] {
        &self.data[self.start..]
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the producer below reported end of stream.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Record end of stream.
    pub fn mark_eof(&mut self) {
        self.eof = true;
    }

    /// Drop `n` buffered bytes.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len(), "consume past buffered data");
        self.start = (self.start + n).min(self.data.len());
        if self.start == self.data.len() {
            self.data.clear();
            self.start = 0;
        }
    }

    /// Append bytes handed over by a producer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.compact();
        self.data.extend_from_slice(bytes);
    }

    /// Let `produce` write up to `want` bytes directly into the buffer.
    ///
    /// On error nothing is appended.
    pub fn fill_with<F>(&mut self, want: usize, produce: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8]) -> Result<usize>,
    {
        self.compact();
        let old = self.data.len();
        self.data.resize(old + want, 0);
        match produce(&mut self.data[old..]) {
            Ok(n) => {
                self.data.truncate(old + n);
                Ok(n)
            }
            Err(err) => {
                self.data.truncate(old);
                Err(err)
            }
        }
    }

    /// Forget everything, including end of stream. Used after a seek.
    pub fn reset(&mut self) {
        self.data.clear();
        self.start = 0;
        self.eof = false;
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.data.drain(..self.start);
            self.start = 0;
        }
    }
}

/// An [`Upstream`] over a byte slice. Handy for tests and for formats that
/// parse a fully buffered record.
#[derive(Debug)]
pub struct SliceStream<'a> {
    data: &'a [u8],
    position: usize,
    step: usize,
}

impl<'a> SliceStream<'a> {
    /// Stream over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            step: usize::MAX,
        }
    }

    /// Limit how many bytes a single skip step may cover.
    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step.max(1);
        self
    }
}

impl Upstream for SliceStream<'_> {
    fn peek(&mut self, _min: usize) -> Result<&[u8]> {
        Ok(&self.data[self.position..])
    }

    fn consume(&mut self, n: usize) {
        self.position = (self.position + n).min(self.data.len());
    }

    fn skip(&mut self, n: u64) -> Result<u64> {
        let left = (self.data.len() - self.position) as u64;
        let step = n.min(left).min(self.step as u64);
        self.position += step as usize;
        Ok(step)
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn seekable(&self) -> bool {
        true
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let base = match whence {
            Whence::Set => 0,
            Whence::Current => self.position as i64,
            Whence::End => self.data.len() as i64,
        };
        let target = base
            .checked_add(offset)
            .filter(|t| (0..=self.data.len() as i64).contains(t))
            .ok_or(ArchiveError::InvalidHookResult {
                op: "seek",
                value: offset,
            })?;
        self.position = target as usize;
        Ok(target as u64)
    }
}

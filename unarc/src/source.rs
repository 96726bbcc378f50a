//! The bottom of the decode pipeline: the bound hooks seen as a stream.

use log::trace;
use unarc_core::Status;
use unarc_core::error::Result;
use unarc_core::io::{IoAdapter, ReaderId, Whence};
use unarc_core::stream::{PeekBuf, Upstream};

/// Hook-backed stream.
///
/// Chunks returned by the read hook are buffered until consumed, so a
/// transient hook failure between two chunks loses nothing.
#[derive(Debug)]
pub(crate) struct Source {
    reader: ReaderId,
    adapter: IoAdapter,
    buf: PeekBuf,
    position: u64,
    opened: bool,
}

impl Source {
    pub(crate) fn new(reader: ReaderId, adapter: IoAdapter) -> Self {
        Self {
            reader,
            adapter,
            buf: PeekBuf::new(),
            position: 0,
            opened: false,
        }
    }

    /// Run the open hook unless it already succeeded. Returns the hook's
    /// status on the call that ran it, OK afterwards.
    pub(crate) fn open(&mut self) -> Result<Status> {
        if self.opened {
            return Ok(Status::Ok);
        }
        let status = self.adapter.open(self.reader)?;
        self.opened = true;
        Ok(status)
    }

    /// Run the close hook if the open hook succeeded. Only ever once.
    pub(crate) fn close(&mut self) -> Result<Status> {
        if !std::mem::take(&mut self.opened) {
            return Ok(Status::Ok);
        }
        self.adapter.close(self.reader)
    }

    fn fetch(&mut self) -> Result<()> {
        let chunk = self.adapter.read(self.reader)?;
        if chunk.is_empty() {
            trace!("source: end of input at {}", self.position + self.buf.len() as u64);
            self.buf.mark_eof();
        } else {
            self.buf.extend(&chunk);
        }
        Ok(())
    }
}

impl Upstream for Source {
    fn peek(&mut self, min: usize) -> Result<&[u8]> {
        let min = min.max(1);
        while self.buf.len() < min && !self.buf.is_eof() {
            self.fetch()?;
        }
        Ok(self.buf.available())
    }

    fn consume(&mut self, n: usize) {
        self.buf.consume(n);
        self.position += n as u64;
    }

    fn skip(&mut self, n: u64) -> Result<u64> {
        if n == 0 {
            return Ok(0);
        }
        if self.buf.is_empty() && !self.buf.is_eof() && self.adapter.can_skip() {
            let skipped = self.adapter.skip(self.reader, n)?;
            if skipped > 0 {
                self.position += skipped;
                return Ok(skipped);
            }
        }
        // read and discard
        let available = self.peek(1)?.len() as u64;
        let step = n.min(available);
        self.consume(step as usize);
        Ok(step)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seekable(&self) -> bool {
        self.adapter.can_seek()
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        // The hook's notion of "current" is past the buffered bytes.
        let (offset, whence) = match whence {
            Whence::Current => (offset.saturating_add(self.position as i64), Whence::Set),
            other => (offset, other),
        };
        let position = self.adapter.seek(self.reader, offset, whence)?;
        self.buf.reset();
        self.position = position;
        Ok(position)
    }
}

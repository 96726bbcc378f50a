//! Core traits for the read pipeline.
//!
//! Filters and formats are collaborators: the engine composes them but does
//! not know their byte-level details. Each reader owns its own set of
//! instances, so implementations are free to keep per-stream state.

use crate::entry::Entry;
use crate::error::Result;
use crate::io::{CloseHook, IoAdapter, OpenHook, ReadHook, ReaderId, SeekHook, SkipHook};
use crate::status::Status;
use crate::stream::Upstream;
use std::path::Path;

/// Detects and instantiates one kind of decompression filter.
pub trait FilterBidder: Send {
    /// Capability name, used for idempotent registration.
    fn name(&self) -> &str;

    /// Inspect the head of `upstream` and return how many bits of signature
    /// matched. Zero means "not mine". Must not consume.
    fn bid(&mut self, upstream: &mut dyn Upstream) -> Result<u32>;

    /// Create the decoding layer for a stream this bidder won.
    fn init(&mut self, upstream: &mut dyn Upstream) -> Result<Box<dyn Filter>>;
}

/// A decoding layer stacked on top of another stream.
pub trait Filter: Send {
    /// Name reported by the reader's filter list.
    fn name(&self) -> &str;

    /// Decode into `out`, pulling from `upstream` as needed. `Ok(0)` means
    /// end of the decoded stream. On error nothing beyond what was already
    /// reported has been consumed from `upstream`.
    fn read(&mut self, upstream: &mut dyn Upstream, out: &mut [u8]) -> Result<usize>;
}

/// Outcome of reading one header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// The entry was populated.
    Entry,
    /// The entry was populated, but the header had a recoverable quirk.
    Warning(String),
    /// The container has no more members.
    End,
}

/// A container format: detection plus entry iteration.
pub trait FormatReader: Send {
    /// Capability name, used for idempotent registration.
    fn name(&self) -> &str;

    /// True when the format needs random access to the source.
    fn requires_seek(&self) -> bool {
        false
    }

    /// Inspect the head of the decoded stream and return a confidence score.
    /// Zero means "not mine". Must not consume.
    fn bid(&mut self, stream: &mut dyn Upstream) -> Result<u32>;

    /// Advance to the next member and populate `entry`. The previous body
    /// has already been skipped.
    fn read_header(&mut self, stream: &mut dyn Upstream, entry: &mut Entry) -> Result<Header>;

    /// Where the last header began, for formats that seek to their headers.
    /// `None` means it began where the stream stood when
    /// [`FormatReader::read_header`] was called.
    fn header_offset(&self) -> Option<u64> {
        None
    }

    /// Read up to `buf.len()` bytes of the current body. `Ok(0)` ends it.
    fn read_data(&mut self, stream: &mut dyn Upstream, buf: &mut [u8]) -> Result<usize>;

    /// Skip whatever remains of the current body.
    fn skip_data(&mut self, stream: &mut dyn Upstream) -> Result<()>;
}

/// The reader surface.
///
/// The engine's `Reader` is the main implementation; instrumented wrappers
/// and test doubles implement it too.
pub trait ArchiveReader {
    /// This reader's identity.
    fn id(&self) -> ReaderId;

    /// Enable a filter by name.
    fn enable_filter(&mut self, name: &str) -> Status;
    /// Enable every filter this build supports.
    fn enable_all_filters(&mut self) -> Status;
    /// Enable a format by name.
    fn enable_format(&mut self, name: &str) -> Status;
    /// Enable every format this build supports.
    fn enable_all_formats(&mut self) -> Status;
    /// Decompress through an external program, tried unconditionally.
    fn enable_filter_program(&mut self, command: &str) -> Status;
    /// Decompress through an external program when the stream starts with
    /// `signature`.
    fn enable_filter_program_signature(&mut self, command: &str, signature: &[u8]) -> Status;

    /// Bind the open hook.
    fn set_open_hook(&mut self, hook: OpenHook) -> Status;
    /// Bind the read hook.
    fn set_read_hook(&mut self, hook: ReadHook) -> Status;
    /// Bind the skip hook.
    fn set_skip_hook(&mut self, hook: SkipHook) -> Status;
    /// Bind the seek hook.
    fn set_seek_hook(&mut self, hook: SeekHook) -> Status;
    /// Bind the close hook.
    fn set_close_hook(&mut self, hook: CloseHook) -> Status;
    /// Bind a prepared adapter instead of individual hooks.
    fn bind_io(&mut self, adapter: IoAdapter) -> Status;

    /// Open using the bound hooks.
    fn open(&mut self) -> Status;
    /// Bind a named file and open it.
    fn open_filename(&mut self, path: &Path, block_size: usize) -> Status;
    /// Bind an in-memory buffer and open it.
    fn open_memory(&mut self, data: Vec<u8>) -> Status;
    /// Bind an open file descriptor and open it.
    #[cfg(unix)]
    fn open_fd(&mut self, fd: std::os::fd::BorrowedFd<'_>, block_size: usize) -> Status;

    /// A fresh entry bound to this reader.
    fn create_entry(&self) -> Entry;
    /// Advance to the next member.
    fn next_header(&mut self, entry: &mut Entry) -> Status;
    /// Read from the current member's body.
    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize>;
    /// Skip the rest of the current member's body.
    fn skip_data(&mut self) -> Status;
    /// Release the source.
    fn close(&mut self) -> Status;
}

/// Creates readers.
pub trait ReaderFactory {
    /// The reader type produced.
    type Reader: ArchiveReader;

    /// Create a fresh, unconfigured reader.
    fn create_reader(&self) -> Self::Reader;
}

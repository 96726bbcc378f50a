//! The reader: capability registration, source binding and entry
//! iteration behind a status-returning surface.

use crate::options::ReaderOptions;
use crate::pipeline::Pipeline;
use crate::registry::Registry;
use crate::source::Source;
use log::{debug, warn};
use std::fmt;
use std::io;
use std::path::Path;
use unarc_core::entry::Entry;
use unarc_core::error::{ArchiveError, Result};
use unarc_core::io::{
    Callbacks, CloseHook, FileSource, IoAdapter, MemorySource, OpenHook, ReadHook, ReaderId,
    SeekHook, SkipHook,
};
use unarc_core::status::Status;
use unarc_core::traits::{ArchiveReader, FilterBidder, FormatReader, Header, ReaderFactory};

/// Where a reader is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Capabilities and hooks may be configured.
    Unopened,
    /// The source is open and detection has not finished (a RETRY
    /// interrupted it).
    Opening,
    /// Entries are being delivered.
    Streaming,
    /// END_OF_DATA was reported.
    Exhausted,
    /// Close was called.
    Closed,
    /// A FATAL error occurred; only close is meaningful.
    Errored,
}

impl ReaderState {
    /// Lower-case name, used in messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unopened => "unopened",
            Self::Opening => "opening",
            Self::Streaming => "streaming",
            Self::Exhausted => "exhausted",
            Self::Closed => "closed",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The error behind the most recent non-OK status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// The status it surfaced as.
    pub status: Status,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

/// What the reader will pull bytes from once opened.
enum Binding {
    Unbound,
    Hooks(Callbacks),
    Adapter(IoAdapter),
}

/// An archive reader.
///
/// Configure capabilities and a source, open, then iterate:
///
/// ```
/// use unarc::{ArchiveReader, Reader, Status};
///
/// let mut reader = Reader::new();
/// assert_eq!(reader.enable_all_formats(), Status::Ok);
/// assert_eq!(reader.open_memory(Vec::new()), Status::Ok);
///
/// let mut entry = reader.create_entry();
/// assert_eq!(reader.next_header(&mut entry), Status::Eof);
/// assert_eq!(reader.close(), Status::Ok);
/// ```
pub struct Reader {
    id: ReaderId,
    options: ReaderOptions,
    state: ReaderState,
    registry: Registry,
    binding: Binding,
    pipeline: Option<Pipeline>,
    entries: u64,
    last_error: Option<LastError>,
    /// The open hook answered WARN; reported once open completes.
    open_warning: bool,
}

impl Reader {
    /// A reader with default options.
    pub fn new() -> Self {
        Self::with_options(ReaderOptions::default())
    }

    /// A reader with the given options.
    pub fn with_options(options: ReaderOptions) -> Self {
        Self {
            id: ReaderId::next(),
            options,
            state: ReaderState::Unopened,
            registry: Registry::new(),
            binding: Binding::Unbound,
            pipeline: None,
            entries: 0,
            last_error: None,
            open_warning: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// The options this reader was created with.
    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// The error behind the most recent non-OK status.
    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    /// Stacked filters, outermost first. Empty before detection.
    pub fn filter_names(&self) -> Vec<&str> {
        self.pipeline
            .as_ref()
            .map(|p| p.filter_names())
            .unwrap_or_default()
    }

    /// The selected format, once detection succeeded.
    pub fn format_name(&self) -> Option<&str> {
        self.pipeline.as_ref().and_then(|p| p.format_name())
    }

    /// Offset in the decoded stream where the current entry's header began.
    pub fn header_position(&self) -> u64 {
        self.pipeline.as_ref().map_or(0, |p| p.header_position())
    }

    /// Number of entries delivered so far.
    pub fn entry_count(&self) -> u64 {
        self.entries
    }

    /// Register a third-party filter.
    pub fn register_filter(&mut self, bidder: Box<dyn FilterBidder>) -> Status {
        self.configure("register a filter", |registry| {
            registry.register_filter(bidder);
            Ok(())
        })
    }

    /// Register a third-party format.
    pub fn register_format(&mut self, format: Box<dyn FormatReader>) -> Status {
        self.configure("register a format", |registry| {
            registry.register_format(format);
            Ok(())
        })
    }

    /// Remember `err` as the last error and return its status. FATAL errors
    /// poison an open reader.
    fn note(&mut self, err: &ArchiveError) -> Status {
        let status = err.status();
        match status {
            Status::Retry => debug!("reader {}: {err}", self.id),
            _ => warn!("reader {}: {err}", self.id),
        }
        if status == Status::Fatal
            && matches!(
                self.state,
                ReaderState::Opening | ReaderState::Streaming | ReaderState::Exhausted
            )
        {
            self.state = ReaderState::Errored;
        }
        self.last_error = Some(LastError {
            status,
            message: err.to_string(),
        });
        status
    }

    fn record(&mut self, err: ArchiveError) -> Status {
        self.note(&err)
    }

    fn status_of(&mut self, result: Result<()>) -> Status {
        match result {
            Ok(()) => Status::Ok,
            Err(err) => self.record(err),
        }
    }

    fn require_unopened(&self, op: &'static str) -> Result<()> {
        match self.state {
            ReaderState::Unopened => Ok(()),
            state => Err(ArchiveError::invalid_state(op, state.name())),
        }
    }

    fn configure<F>(&mut self, op: &'static str, apply: F) -> Status
    where
        F: FnOnce(&mut Registry) -> Result<()>,
    {
        let result = self
            .require_unopened(op)
            .and_then(|()| apply(&mut self.registry));
        self.status_of(result)
    }

    fn bind_hook(&mut self, op: &'static str, apply: impl FnOnce(&mut Callbacks)) -> Status {
        if let Err(err) = self.require_unopened(op) {
            return self.record(err);
        }
        if !matches!(self.binding, Binding::Hooks(_)) {
            self.binding = Binding::Hooks(Callbacks::new());
        }
        if let Binding::Hooks(hooks) = &mut self.binding {
            apply(hooks);
        }
        Status::Ok
    }

    fn bind(&mut self, op: &'static str, adapter: Result<IoAdapter>) -> Result<()> {
        self.require_unopened(op)?;
        let adapter = adapter?;
        if adapter.owner() != self.id {
            return Err(ArchiveError::ForeignHandle {
                owner: adapter.owner(),
                caller: self.id,
            });
        }
        self.binding = Binding::Adapter(adapter);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        match self.state {
            ReaderState::Unopened => {}
            ReaderState::Opening => return self.resume_open(),
            state => return Err(ArchiveError::invalid_state("open", state.name())),
        }
        let adapter = match std::mem::replace(&mut self.binding, Binding::Unbound) {
            Binding::Unbound => return Err(ArchiveError::MissingHook { op: "read" }),
            Binding::Hooks(hooks) => IoAdapter::new(self.id, hooks),
            Binding::Adapter(adapter) => adapter,
        };
        if !adapter.can_read() {
            return Err(ArchiveError::MissingHook { op: "read" });
        }
        let (filters, formats) = self.registry.take();
        let source = Source::new(self.id, adapter);
        self.pipeline = Some(Pipeline::new(
            source,
            filters,
            formats,
            self.options.max_filter_depth,
        ));
        self.state = ReaderState::Opening;
        self.resume_open()
    }

    fn resume_open(&mut self) -> Result<()> {
        let pipeline = self
            .pipeline
            .as_mut()
            .ok_or_else(|| ArchiveError::invalid_state("open", "unbound"))?;
        if pipeline.open_source()? == Status::Warn {
            self.open_warning = true;
        }
        pipeline.detect()?;
        debug!(
            "reader {}: filters {:?}, format {:?}",
            self.id,
            pipeline.filter_names(),
            pipeline.format_name()
        );
        self.state = ReaderState::Streaming;
        Ok(())
    }

    fn open_with(&mut self, op: &'static str, adapter: Result<IoAdapter>) -> Status {
        let result = self.bind(op, adapter);
        if let Err(err) = result {
            return self.record(err);
        }
        self.open()
    }

    fn pipeline_for(&mut self, op: &'static str) -> Result<&mut Pipeline> {
        match self.state {
            ReaderState::Streaming => {}
            state => return Err(ArchiveError::invalid_state(op, state.name())),
        }
        self.pipeline
            .as_mut()
            .filter(|p| p.is_ready())
            .ok_or_else(|| ArchiveError::invalid_state(op, "detecting"))
    }

    fn next(&mut self, entry: &mut Entry) -> Result<Status> {
        if !entry.adopt(self.id) {
            let owner = entry.owner().unwrap_or(self.id);
            return Err(ArchiveError::ForeignEntry {
                owner,
                reader: self.id,
            });
        }
        match self.state {
            ReaderState::Exhausted => return Ok(Status::Eof),
            ReaderState::Errored => {
                return Err(ArchiveError::invalid_state("read a header", "errored"));
            }
            _ => {}
        }
        let pipeline = self.pipeline_for("read a header")?;
        entry.clear();
        match pipeline.next_header(entry)? {
            Header::Entry => {
                self.entries += 1;
                Ok(Status::Ok)
            }
            Header::Warning(message) => {
                self.entries += 1;
                warn!("reader {}: {}: {message}", self.id, entry.name);
                self.last_error = Some(LastError {
                    status: Status::Warn,
                    message,
                });
                Ok(Status::Warn)
            }
            Header::End => {
                debug!("reader {}: end of archive after {} entries", self.id, self.entries);
                self.state = ReaderState::Exhausted;
                Ok(Status::Eof)
            }
        }
    }

    /// Read the rest of the current body into memory.
    ///
    /// A RETRY surfaces as an error and loses the bytes gathered by this
    /// call; use [`ArchiveReader::read_data`] to resume byte by byte.
    pub fn read_data_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = self.read_data(&mut buf)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// The current body as an [`io::Read`].
    pub fn data(&mut self) -> EntryData<'_> {
        EntryData { reader: self }
    }
}

impl Default for Reader {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("registry", &self.registry)
            .field("pipeline", &self.pipeline)
            .field("entries", &self.entries)
            .finish()
    }
}

impl ArchiveReader for Reader {
    fn id(&self) -> ReaderId {
        self.id
    }

    fn enable_filter(&mut self, name: &str) -> Status {
        self.configure("enable a filter", |registry| registry.enable_filter(name))
    }

    fn enable_all_filters(&mut self) -> Status {
        self.configure("enable filters", |registry| {
            registry.enable_all_filters();
            Ok(())
        })
    }

    fn enable_format(&mut self, name: &str) -> Status {
        self.configure("enable a format", |registry| registry.enable_format(name))
    }

    fn enable_all_formats(&mut self) -> Status {
        self.configure("enable formats", |registry| {
            registry.enable_all_formats();
            Ok(())
        })
    }

    fn enable_filter_program(&mut self, command: &str) -> Status {
        self.configure("enable a program", |registry| {
            registry.enable_program(command, None)
        })
    }

    fn enable_filter_program_signature(&mut self, command: &str, signature: &[u8]) -> Status {
        self.configure("enable a program", |registry| {
            registry.enable_program(command, Some(signature))
        })
    }

    fn set_open_hook(&mut self, hook: OpenHook) -> Status {
        self.bind_hook("set the open hook", |hooks| hooks.set_open(hook))
    }

    fn set_read_hook(&mut self, hook: ReadHook) -> Status {
        self.bind_hook("set the read hook", |hooks| hooks.set_read(hook))
    }

    fn set_skip_hook(&mut self, hook: SkipHook) -> Status {
        self.bind_hook("set the skip hook", |hooks| hooks.set_skip(hook))
    }

    fn set_seek_hook(&mut self, hook: SeekHook) -> Status {
        self.bind_hook("set the seek hook", |hooks| hooks.set_seek(hook))
    }

    fn set_close_hook(&mut self, hook: CloseHook) -> Status {
        self.bind_hook("set the close hook", |hooks| hooks.set_close(hook))
    }

    fn bind_io(&mut self, adapter: IoAdapter) -> Status {
        let result = self.bind("bind an adapter", Ok(adapter));
        self.status_of(result)
    }

    fn open(&mut self) -> Status {
        match self.start() {
            Ok(()) if std::mem::take(&mut self.open_warning) => {
                self.record(ArchiveError::hook("open", Status::Warn))
            }
            Ok(()) => Status::Ok,
            Err(err) => {
                let status = self.record(err);
                // A failed open is final unless the hook asked for a retry.
                if status != Status::Retry && self.state == ReaderState::Opening {
                    self.state = ReaderState::Errored;
                }
                status
            }
        }
    }

    fn open_filename(&mut self, path: &Path, block_size: usize) -> Status {
        let block_size = self.options.block_size(block_size);
        let adapter = IoAdapter::new(self.id, FileSource::new(path, block_size));
        self.open_with("open a file", Ok(adapter))
    }

    fn open_memory(&mut self, data: Vec<u8>) -> Status {
        let source = MemorySource::new(data, self.options.memory_chunk_size);
        let adapter = IoAdapter::new(self.id, source);
        self.open_with("open memory", Ok(adapter))
    }

    #[cfg(unix)]
    fn open_fd(&mut self, fd: std::os::fd::BorrowedFd<'_>, block_size: usize) -> Status {
        let block_size = self.options.block_size(block_size);
        let adapter = unarc_core::io::FdSource::new(fd, block_size)
            .map(|source| IoAdapter::new(self.id, source))
            .map_err(ArchiveError::from);
        self.open_with("open a descriptor", adapter)
    }

    fn create_entry(&self) -> Entry {
        Entry::bound_to(self.id)
    }

    fn next_header(&mut self, entry: &mut Entry) -> Status {
        match self.next(entry) {
            Ok(status) => status,
            Err(err) => self.record(err),
        }
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state == ReaderState::Exhausted {
            return Ok(0);
        }
        let result = self
            .pipeline_for("read data")
            .and_then(|pipeline| pipeline.read_data(buf));
        if let Err(err) = &result {
            self.note(err);
        }
        result
    }

    fn skip_data(&mut self) -> Status {
        if self.state == ReaderState::Exhausted {
            return Status::Ok;
        }
        let result = self
            .pipeline_for("skip data")
            .and_then(|pipeline| pipeline.skip_data());
        self.status_of(result)
    }

    fn close(&mut self) -> Status {
        if self.state == ReaderState::Closed {
            return Status::Ok;
        }
        self.state = ReaderState::Closed;
        let Some(mut pipeline) = self.pipeline.take() else {
            return Status::Ok;
        };
        let result = pipeline.close_source();
        // Dropping the pipeline reaps any filter programs.
        drop(pipeline);
        debug!("reader {}: closed", self.id);
        match result {
            Ok(Status::Warn) => self.record(ArchiveError::hook("close", Status::Warn)),
            Ok(_) => Status::Ok,
            Err(err) => self.record(err),
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if self.state != ReaderState::Closed {
            self.close();
        }
    }
}

/// [`io::Read`] over the current entry's body.
#[derive(Debug)]
pub struct EntryData<'a> {
    reader: &'a mut Reader,
}

impl io::Read for EntryData<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read_data(buf).map_err(ArchiveError::into_io)
    }
}

/// Creates [`Reader`]s that share one set of options.
#[derive(Debug, Clone, Default)]
pub struct DefaultReaderFactory {
    options: ReaderOptions,
}

impl DefaultReaderFactory {
    /// A factory handing out readers with `options`.
    pub fn new(options: ReaderOptions) -> Self {
        Self { options }
    }
}

impl ReaderFactory for DefaultReaderFactory {
    type Reader = Reader;

    fn create_reader(&self) -> Reader {
        Reader::with_options(self.options.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn test_reader_is_send() {
        assert_send::<Reader>();
    }

    #[test]
    fn test_open_without_read_hook() {
        let mut reader = Reader::new();
        reader.enable_all_formats();
        assert_eq!(reader.open(), Status::Fatal);
        assert_eq!(reader.last_error().unwrap().status, Status::Fatal);

        let mut reader = Reader::new();
        reader.set_open_hook(Box::new(|| Status::Ok));
        assert_eq!(reader.open(), Status::Fatal);
    }

    #[test]
    fn test_registration_after_open_is_fatal() {
        let mut reader = Reader::new();
        reader.enable_format("empty");
        assert_eq!(reader.open_memory(Vec::new()), Status::Ok);
        assert_eq!(reader.enable_format("tar"), Status::Fatal);
        assert_eq!(reader.state(), ReaderState::Errored);
        assert_eq!(reader.set_read_hook(Box::new(|| (Status::Ok, Vec::new()))), Status::Fatal);
    }

    #[test]
    fn test_unsupported_capability_is_failed() {
        let mut reader = Reader::new();
        assert_eq!(reader.enable_filter("lzop"), Status::Failed);
        assert_eq!(reader.enable_format("iso9660"), Status::Failed);
        assert_eq!(reader.state(), ReaderState::Unopened);
        assert_eq!(reader.enable_format("cpio"), Status::Ok);
    }

    #[test]
    fn test_foreign_adapter_is_fatal() {
        let other = ReaderId::next();
        let mut reader = Reader::new();
        let adapter = IoAdapter::new(other, MemorySource::new(Vec::new(), 16));
        assert_eq!(reader.bind_io(adapter), Status::Fatal);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut reader = Reader::new();
        assert_eq!(reader.close(), Status::Ok);
        assert_eq!(reader.close(), Status::Ok);
        assert_eq!(reader.state(), ReaderState::Closed);
        assert_eq!(reader.open(), Status::Fatal);
    }

    #[test]
    fn test_factory_applies_options() {
        let factory = DefaultReaderFactory::new(ReaderOptions::default().with_max_filter_depth(2));
        let a = factory.create_reader();
        let b = factory.create_reader();
        assert_eq!(a.options().max_filter_depth, 2);
        assert_ne!(a.id(), b.id());
    }
}

//! I/O hooks and the adapter that bridges them into the engine.
//!
//! A reader pulls bytes through five hooks: open, read, skip, seek and
//! close. Custom callers bind closures one by one through [`Callbacks`];
//! the convenience transports ([`FileSource`], [`MemorySource`],
//! [`FdSource`]) implement the same [`ByteSource`] trait directly.
//!
//! The [`IoAdapter`] stamps a source with the [`ReaderId`] that registered
//! it and validates every invocation against that identity.

use crate::error::{ArchiveError, Result};
use crate::status::Status;
use log::{debug, trace};
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default block size for file and descriptor transports.
pub const DEFAULT_BLOCK_SIZE: usize = 10240;

/// Identity of one reader instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderId(u64);

impl ReaderId {
    /// Allocate a fresh, process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Origin of a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the source.
    Set,
    /// From the current position.
    Current,
    /// From the end of the source.
    End,
}

impl Whence {
    /// Combine with an offset into a [`SeekFrom`].
    pub fn to_seek_from(self, offset: i64) -> Option<SeekFrom> {
        match self {
            Self::Set => u64::try_from(offset).ok().map(SeekFrom::Start),
            Self::Current => Some(SeekFrom::Current(offset)),
            Self::End => Some(SeekFrom::End(offset)),
        }
    }
}

/// Prepare the source. Called once before the first read.
pub type OpenHook = Box<dyn FnMut() -> Status + Send>;
/// Hand back the next available chunk. OK with an empty chunk is end of input.
pub type ReadHook = Box<dyn FnMut() -> (Status, Vec<u8>) + Send>;
/// Skip forward up to the requested count; return how many were skipped.
pub type SkipHook = Box<dyn FnMut(i64) -> i64 + Send>;
/// Reposition; return the resulting absolute offset or a negative value.
pub type SeekHook = Box<dyn FnMut(i64, Whence) -> i64 + Send>;
/// Release the source. Called once at close if open succeeded.
pub type CloseHook = Box<dyn FnMut() -> Status + Send>;

/// A byte source the engine can pull from.
///
/// Only `read` is mandatory. Sources report skip and seek support through
/// [`ByteSource::can_skip`] and [`ByteSource::can_seek`]; without seek the
/// pipeline runs in streaming-only mode.
pub trait ByteSource: Send {
    /// Prepare the source.
    fn open(&mut self) -> Status {
        Status::Ok
    }

    /// Whether a read operation is available at all.
    fn can_read(&self) -> bool {
        true
    }

    /// Supply the next chunk of bytes.
    fn read(&mut self) -> (Status, Vec<u8>);

    /// Whether [`ByteSource::skip`] is implemented.
    fn can_skip(&self) -> bool {
        false
    }

    /// Skip forward, best effort.
    fn skip(&mut self, _request: i64) -> i64 {
        0
    }

    /// Whether [`ByteSource::seek`] is implemented.
    fn can_seek(&self) -> bool {
        false
    }

    /// Reposition and return the new absolute offset, or a negative value.
    fn seek(&mut self, _offset: i64, _whence: Whence) -> i64 {
        -1
    }

    /// Release the source.
    fn close(&mut self) -> Status {
        Status::Ok
    }
}

/// A source assembled from individually bound closures.
#[derive(Default)]
pub struct Callbacks {
    open: Option<OpenHook>,
    read: Option<ReadHook>,
    skip: Option<SkipHook>,
    seek: Option<SeekHook>,
    close: Option<CloseHook>,
}

impl Callbacks {
    /// Create an empty hook set.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no hook has been bound.
    pub fn is_empty(&self) -> bool {
        self.open.is_none()
            && self.read.is_none()
            && self.skip.is_none()
            && self.seek.is_none()
            && self.close.is_none()
    }

    /// Bind the open hook.
    pub fn set_open(&mut self, hook: OpenHook) {
        self.open = Some(hook);
    }

    /// Bind the read hook.
    pub fn set_read(&mut self, hook: ReadHook) {
        self.read = Some(hook);
    }

    /// Bind the skip hook.
    pub fn set_skip(&mut self, hook: SkipHook) {
        self.skip = Some(hook);
    }

    /// Bind the seek hook.
    pub fn set_seek(&mut self, hook: SeekHook) {
        self.seek = Some(hook);
    }

    /// Bind the close hook.
    pub fn set_close(&mut self, hook: CloseHook) {
        self.close = Some(hook);
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("open", &self.open.is_some())
            .field("read", &self.read.is_some())
            .field("skip", &self.skip.is_some())
            .field("seek", &self.seek.is_some())
            .field("close", &self.close.is_some())
            .finish()
    }
}

impl ByteSource for Callbacks {
    fn open(&mut self) -> Status {
        self.open.as_mut().map_or(Status::Ok, |hook| hook())
    }

    fn can_read(&self) -> bool {
        self.read.is_some()
    }

    fn read(&mut self) -> (Status, Vec<u8>) {
        match self.read.as_mut() {
            Some(hook) => hook(),
            None => (Status::Fatal, Vec::new()),
        }
    }

    fn can_skip(&self) -> bool {
        self.skip.is_some()
    }

    fn skip(&mut self, request: i64) -> i64 {
        self.skip.as_mut().map_or(0, |hook| hook(request))
    }

    fn can_seek(&self) -> bool {
        self.seek.is_some()
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> i64 {
        self.seek.as_mut().map_or(-1, |hook| hook(offset, whence))
    }

    fn close(&mut self) -> Status {
        self.close.as_mut().map_or(Status::Ok, |hook| hook())
    }
}

/// A source bound to the reader that registered it.
///
/// Every call names the reader making it; a mismatch is rejected with
/// [`ArchiveError::ForeignHandle`] before the underlying hook runs.
pub struct IoAdapter {
    owner: ReaderId,
    source: Box<dyn ByteSource>,
}

impl IoAdapter {
    /// Bind a source to a reader.
    pub fn new(owner: ReaderId, source: impl ByteSource + 'static) -> Self {
        Self {
            owner,
            source: Box::new(source),
        }
    }

    /// The reader this adapter belongs to.
    pub fn owner(&self) -> ReaderId {
        self.owner
    }

    fn check(&self, caller: ReaderId) -> Result<()> {
        if caller == self.owner {
            Ok(())
        } else {
            Err(ArchiveError::ForeignHandle {
                owner: self.owner,
                caller,
            })
        }
    }

    /// Whether a read hook is available.
    pub fn can_read(&self) -> bool {
        self.source.can_read()
    }

    /// Whether a skip hook is available.
    pub fn can_skip(&self) -> bool {
        self.source.can_skip()
    }

    /// Whether a seek hook is available.
    pub fn can_seek(&self) -> bool {
        self.source.can_seek()
    }

    /// Invoke the open hook. OK and WARN are both success and are
    /// returned as given.
    pub fn open(&mut self, caller: ReaderId) -> Result<Status> {
        self.check(caller)?;
        match self.source.open() {
            status @ (Status::Ok | Status::Warn) => Ok(status),
            status => Err(ArchiveError::hook("open", status)),
        }
    }

    /// Invoke the read hook. An empty chunk means end of input.
    pub fn read(&mut self, caller: ReaderId) -> Result<Vec<u8>> {
        self.check(caller)?;
        if !self.source.can_read() {
            return Err(ArchiveError::MissingHook { op: "read" });
        }
        let (status, chunk) = self.source.read();
        trace!("read hook: {} with {} bytes", status, chunk.len());
        match status {
            Status::Ok | Status::Warn => Ok(chunk),
            Status::Eof => Ok(Vec::new()),
            status => Err(ArchiveError::hook("read", status)),
        }
    }

    /// Invoke the skip hook. Returns the number of bytes actually skipped.
    pub fn skip(&mut self, caller: ReaderId, request: u64) -> Result<u64> {
        self.check(caller)?;
        if !self.source.can_skip() {
            return Ok(0);
        }
        let request = i64::try_from(request).unwrap_or(i64::MAX);
        let skipped = self.source.skip(request);
        trace!("skip hook: requested {request}, skipped {skipped}");
        if skipped < 0 || skipped > request {
            return Err(ArchiveError::InvalidHookResult {
                op: "skip",
                value: skipped,
            });
        }
        Ok(skipped as u64)
    }

    /// Invoke the seek hook. Returns the resulting absolute offset.
    pub fn seek(&mut self, caller: ReaderId, offset: i64, whence: Whence) -> Result<u64> {
        self.check(caller)?;
        if !self.source.can_seek() {
            return Err(ArchiveError::NotSeekable);
        }
        let position = self.source.seek(offset, whence);
        trace!("seek hook: {offset} {whence:?} -> {position}");
        u64::try_from(position).map_err(|_| ArchiveError::InvalidHookResult {
            op: "seek",
            value: position,
        })
    }

    /// Invoke the close hook, passing WARN through like [`Self::open`].
    pub fn close(&mut self, caller: ReaderId) -> Result<Status> {
        self.check(caller)?;
        match self.source.close() {
            status @ (Status::Ok | Status::Warn) => Ok(status),
            status => Err(ArchiveError::hook("close", status)),
        }
    }
}

impl fmt::Debug for IoAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoAdapter")
            .field("owner", &self.owner)
            .field("skip", &self.can_skip())
            .field("seek", &self.can_seek())
            .finish()
    }
}

/// Clamp a skip request against the bytes left in a seekable handle.
fn skip_within<S: Seek>(handle: &mut S, request: i64, len: u64) -> i64 {
    let Ok(position) = handle.stream_position() else {
        return 0;
    };
    let step = (request.max(0) as u64).min(len.saturating_sub(position));
    match handle.seek(SeekFrom::Current(step as i64)) {
        Ok(_) => step as i64,
        Err(_) => 0,
    }
}

fn read_block<R: Read>(handle: &mut R, block_size: usize) -> (Status, Vec<u8>) {
    let mut block = vec![0u8; block_size.max(1)];
    loop {
        match handle.read(&mut block) {
            Ok(n) => {
                block.truncate(n);
                return (Status::Ok, block);
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!("read failed: {err}");
                return (Status::Fatal, Vec::new());
            }
        }
    }
}

/// A named file read in caller-chosen blocks.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    block_size: usize,
    file: Option<File>,
    len: u64,
}

impl FileSource {
    /// Describe a file to be opened by the open hook.
    pub fn new(path: impl AsRef<Path>, block_size: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            block_size,
            file: None,
            len: 0,
        }
    }
}

impl ByteSource for FileSource {
    fn open(&mut self) -> Status {
        match File::open(&self.path).and_then(|file| Ok((file.metadata()?.len(), file))) {
            Ok((len, file)) => {
                debug!("opened {} ({len} bytes)", self.path.display());
                self.len = len;
                self.file = Some(file);
                Status::Ok
            }
            Err(err) => {
                debug!("cannot open {}: {err}", self.path.display());
                Status::Fatal
            }
        }
    }

    fn read(&mut self) -> (Status, Vec<u8>) {
        match self.file.as_mut() {
            Some(file) => read_block(file, self.block_size),
            None => (Status::Fatal, Vec::new()),
        }
    }

    fn can_skip(&self) -> bool {
        true
    }

    fn skip(&mut self, request: i64) -> i64 {
        let len = self.len;
        self.file
            .as_mut()
            .map_or(0, |file| skip_within(file, request, len))
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> i64 {
        let (Some(file), Some(from)) = (self.file.as_mut(), whence.to_seek_from(offset)) else {
            return -1;
        };
        file.seek(from).map_or(-1, |position| position as i64)
    }

    fn close(&mut self) -> Status {
        self.file = None;
        Status::Ok
    }
}

/// An in-memory byte range handed out in fixed-size chunks.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
    position: usize,
    chunk_size: usize,
}

impl MemorySource {
    /// Serve `data` in chunks of at most `chunk_size` bytes.
    pub fn new(data: impl Into<Vec<u8>>, chunk_size: usize) -> Self {
        Self {
            data: data.into(),
            position: 0,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self) -> (Status, Vec<u8>) {
        let end = self.data.len().min(self.position + self.chunk_size);
        let chunk = self.data[self.position..end].to_vec();
        self.position = end;
        (Status::Ok, chunk)
    }

    fn can_skip(&self) -> bool {
        true
    }

    fn skip(&mut self, request: i64) -> i64 {
        let step = (request.max(0) as u64).min((self.data.len() - self.position) as u64);
        self.position += step as usize;
        step as i64
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> i64 {
        let base = match whence {
            Whence::Set => 0,
            Whence::Current => self.position as i64,
            Whence::End => self.data.len() as i64,
        };
        match base.checked_add(offset) {
            Some(target) if (0..=self.data.len() as i64).contains(&target) => {
                self.position = target as usize;
                target
            }
            _ => -1,
        }
    }
}

/// An already-open file descriptor.
///
/// The descriptor is duplicated on construction; the caller keeps ownership
/// of the original, and only the duplicate is released at close.
#[cfg(unix)]
#[derive(Debug)]
pub struct FdSource {
    file: Option<File>,
    block_size: usize,
    seekable: bool,
    len: u64,
}

#[cfg(unix)]
impl FdSource {
    /// Duplicate `fd` for reading in caller-chosen blocks.
    pub fn new(fd: std::os::fd::BorrowedFd<'_>, block_size: usize) -> std::io::Result<Self> {
        let file = File::from(fd.try_clone_to_owned()?);
        let meta = file.metadata()?;
        Ok(Self {
            seekable: meta.is_file(),
            len: meta.len(),
            file: Some(file),
            block_size,
        })
    }
}

#[cfg(unix)]
impl ByteSource for FdSource {
    fn read(&mut self) -> (Status, Vec<u8>) {
        match self.file.as_mut() {
            Some(file) => read_block(file, self.block_size),
            None => (Status::Fatal, Vec::new()),
        }
    }

    fn can_skip(&self) -> bool {
        self.seekable
    }

    fn skip(&mut self, request: i64) -> i64 {
        let len = self.len;
        self.file
            .as_mut()
            .map_or(0, |file| skip_within(file, request, len))
    }

    fn can_seek(&self) -> bool {
        self.seekable
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> i64 {
        let (Some(file), Some(from)) = (self.file.as_mut(), whence.to_seek_from(offset)) else {
            return -1;
        };
        file.seek(from).map_or(-1, |position| position as i64)
    }

    fn close(&mut self) -> Status {
        self.file = None;
        Status::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_foreign_caller_rejected() {
        let owner = ReaderId::next();
        let stranger = ReaderId::next();
        let mut adapter = IoAdapter::new(owner, MemorySource::new(b"abc".to_vec(), 2));

        let err = adapter.read(stranger).unwrap_err();
        assert!(matches!(err, ArchiveError::ForeignHandle { .. }));
        assert_eq!(err.status(), Status::Fatal);

        assert_eq!(adapter.read(owner).unwrap(), b"ab");
        assert_eq!(adapter.read(owner).unwrap(), b"c");
        assert!(adapter.read(owner).unwrap().is_empty());
    }

    #[test]
    fn test_callbacks_capabilities() {
        let mut hooks = Callbacks::new();
        assert!(hooks.is_empty());
        assert!(!hooks.can_read());

        hooks.set_read(Box::new(|| (Status::Ok, b"x".to_vec())));
        hooks.set_skip(Box::new(|n| n / 2));
        assert!(hooks.can_read());
        assert!(hooks.can_skip());
        assert!(!hooks.can_seek());

        let id = ReaderId::next();
        let mut adapter = IoAdapter::new(id, hooks);
        assert_eq!(adapter.skip(id, 10).unwrap(), 5);
        assert!(matches!(
            adapter.seek(id, 0, Whence::Set),
            Err(ArchiveError::NotSeekable)
        ));
    }

    #[test]
    fn test_invalid_skip_result() {
        let mut hooks = Callbacks::new();
        hooks.set_read(Box::new(|| (Status::Ok, Vec::new())));
        hooks.set_skip(Box::new(|_| -1));
        let id = ReaderId::next();
        let mut adapter = IoAdapter::new(id, hooks);
        let err = adapter.skip(id, 4).unwrap_err();
        assert_eq!(err.status(), Status::Fatal);
    }

    #[test]
    fn test_hook_status_propagates() {
        let mut hooks = Callbacks::new();
        hooks.set_read(Box::new(|| (Status::Retry, Vec::new())));
        hooks.set_close(Box::new(|| Status::Failed));
        let id = ReaderId::next();
        let mut adapter = IoAdapter::new(id, hooks);
        assert!(adapter.read(id).unwrap_err().is_retry());
        assert_eq!(adapter.close(id).unwrap_err().status(), Status::Failed);
    }

    #[test]
    fn test_open_and_close_warnings_pass_through() {
        let mut hooks = Callbacks::new();
        hooks.set_open(Box::new(|| Status::Warn));
        hooks.set_read(Box::new(|| (Status::Ok, Vec::new())));
        hooks.set_close(Box::new(|| Status::Warn));
        let id = ReaderId::next();
        let mut adapter = IoAdapter::new(id, hooks);
        assert_eq!(adapter.open(id).unwrap(), Status::Warn);
        assert_eq!(adapter.close(id).unwrap(), Status::Warn);
    }

    #[test]
    fn test_memory_seek_and_skip() {
        let mut source = MemorySource::new(b"0123456789".to_vec(), 4);
        assert_eq!(source.skip(3), 3);
        assert_eq!(source.read().1, b"3456");
        assert_eq!(source.seek(-2, Whence::End), 8);
        assert_eq!(source.read().1, b"89");
        assert_eq!(source.skip(100), 0);
        assert_eq!(source.seek(-1, Whence::Set), -1);
        assert_eq!(source.seek(2, Whence::Set), 2);
        assert_eq!(source.seek(1, Whence::Current), 3);
    }

    #[test]
    fn test_file_source() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello, file").unwrap();

        let mut source = FileSource::new(tmp.path(), 5);
        assert_eq!(source.open(), Status::Ok);
        assert_eq!(source.read().1, b"hello");
        assert_eq!(source.skip(100), 6);
        assert!(source.read().1.is_empty());
        assert_eq!(source.seek(7, Whence::Set), 7);
        assert_eq!(source.read().1, b"file");
        assert_eq!(source.close(), Status::Ok);
    }

    #[test]
    fn test_missing_file() {
        let mut source = FileSource::new("/nonexistent/unarc/file.tar", 512);
        assert_eq!(source.open(), Status::Fatal);
    }
}

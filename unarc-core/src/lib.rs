//! # unarc core
//!
//! Core components for the unarc archive reading engine.
//!
//! This crate provides the vocabulary every other layer speaks:
//!
//! - [`status`]: outcome codes returned by reader operations
//! - [`error`]: the error type and its mapping onto statuses
//! - [`entry`]: archive entry metadata
//! - [`io`]: I/O hooks, the hook adapter and the convenience transports
//! - [`stream`]: peekable streams shared by filters and formats
//! - [`traits`]: plug-in traits for filters, formats and readers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Reader (unarc)                                          │
//! │     capability registry, state machine                  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Format (unarc-archive)                                  │
//! │     tar, cpio, ar, zip, raw, empty                      │
//! ├─────────────────────────────────────────────────────────┤
//! │ Filters (unarc-archive), stacked outermost first        │
//! │     gzip, external programs                             │
//! ├─────────────────────────────────────────────────────────┤
//! │ Source (this crate)                                     │
//! │     open/read/skip/seek/close hooks                     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use unarc_core::io::{IoAdapter, MemorySource, ReaderId};
//! use unarc_core::Status;
//!
//! let id = ReaderId::next();
//! let mut adapter = IoAdapter::new(id, MemorySource::new(b"hello".to_vec(), 3));
//! assert_eq!(adapter.read(id).unwrap(), b"hel");
//! assert_eq!(Status::from_code(0), Status::Ok);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod entry;
pub mod error;
pub mod io;
pub mod status;
pub mod stream;
pub mod traits;

// Re-exports for convenience
pub use entry::{DeviceNumber, Entry, EntryType, FileAttributes};
pub use error::{ArchiveError, Result};
pub use io::{ByteSource, Callbacks, IoAdapter, ReaderId, Whence};
pub use status::Status;
pub use stream::{PeekBuf, SliceStream, Upstream};
pub use traits::{ArchiveReader, Filter, FilterBidder, FormatReader, Header, ReaderFactory};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::entry::{Entry, EntryType};
    pub use crate::error::{ArchiveError, Result};
    pub use crate::io::{ReaderId, Whence};
    pub use crate::status::Status;
    pub use crate::stream::Upstream;
    pub use crate::traits::{ArchiveReader, Filter, FilterBidder, FormatReader, Header};
}

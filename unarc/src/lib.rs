//! # unarc
//!
//! An archive reading engine. A [`Reader`] negotiates, on open, which
//! decompression filters and which container format apply to a byte
//! stream, then yields entries one at a time.
//!
//! - Capabilities are enabled per reader, by name or as a whole
//!   (`enable_all_filters`, `enable_all_formats`).
//! - Bytes come from caller-supplied hooks or from one of the
//!   convenience sources (file, memory, descriptor).
//! - Every operation reports a [`Status`]; RETRY leaves the reader ready
//!   to repeat the identical call.
//!
//! ## Example
//!
//! ```rust
//! use unarc::{ArchiveReader, Reader, Status};
//!
//! # fn archive_bytes() -> Vec<u8> { Vec::new() }
//! let mut reader = Reader::new();
//! reader.enable_all_filters();
//! reader.enable_all_formats();
//! assert_eq!(reader.open_memory(archive_bytes()), Status::Ok);
//!
//! let mut entry = reader.create_entry();
//! while reader.next_header(&mut entry) == Status::Ok {
//!     let body = reader.read_data_to_vec().unwrap();
//!     println!("{} ({} bytes)", entry.name, body.len());
//! }
//! reader.close();
//! ```
//!
//! ## Custom hooks
//!
//! ```rust
//! use unarc::{ArchiveReader, Reader, Status};
//!
//! let mut chunks = vec![Vec::new()];
//! let mut reader = Reader::new();
//! reader.enable_format("empty");
//! reader.set_read_hook(Box::new(move || (Status::Ok, chunks.pop().unwrap_or_default())));
//! assert_eq!(reader.open(), Status::Ok);
//! assert_eq!(reader.format_name(), Some("empty"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod options;
mod pipeline;
pub mod reader;
pub mod registry;
mod source;

pub use options::ReaderOptions;
pub use reader::{DefaultReaderFactory, EntryData, LastError, Reader, ReaderState};
pub use registry::Registry;

pub use unarc_core::{
    ArchiveError, ArchiveReader, Entry, EntryType, IoAdapter, ReaderFactory, ReaderId, Result,
    Status, Whence,
};

//! # unarc archive
//!
//! Built-in decompression filters and container formats for unarc.
//!
//! Everything here plugs into the engine through the same traits a
//! third-party collaborator would implement
//! ([`FilterBidder`](unarc_core::traits::FilterBidder),
//! [`FormatReader`](unarc_core::traits::FormatReader)):
//!
//! - **gzip**: RFC 1952 filter, multi-member, CRC-32 verified
//! - **bzip2**, **xz**, **zstd**: stream decoders, concatenated streams
//! - **program**: any external decompressor, fed through a spool file
//! - **tar**: v7, ustar, GNU and pax
//! - **cpio**: SVR4 newc/crc and portable odc
//! - **ar**: `!<arch>` with GNU and BSD long names
//! - **zip**: streaming and central-directory readers
//! - **raw** and **empty**: pseudo-formats for bare streams
//!
//! ## Example
//!
//! ```rust
//! use unarc_archive::detect::{FormatKind, all_formats};
//! use unarc_archive::tar::TarFormat;
//! use unarc_core::stream::SliceStream;
//! use unarc_core::traits::FormatReader;
//!
//! assert!(FormatKind::from_name("gnutar").is_some());
//! assert!(all_formats().iter().any(|f| f.name() == "tar"));
//!
//! // An all-zero block is the tar end-of-archive marker.
//! let block = [0u8; 512];
//! assert!(TarFormat::new().bid(&mut SliceStream::new(&block)).unwrap() > 0);
//! ```
//!
//! ## Capability names
//!
//! Use [`detect`] to turn capability names into collaborators and to get
//! the fixed "all filters" and "all formats" orders.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod ar;
pub mod body;
pub mod codec;
pub mod cpio;
pub mod detect;
pub mod empty;
pub mod gzip;
pub mod program;
pub mod raw;
pub mod tar;
pub mod time;
pub mod zip;

// Re-exports
pub use ar::ArFormat;
pub use codec::{CodecBidder, CodecFilter, CodecKind};
pub use cpio::CpioFormat;
pub use detect::{FilterKind, FormatKind};
pub use empty::EmptyFormat;
pub use gzip::{GzipBidder, GzipFilter};
pub use program::{ProgramBidder, ProgramFilter};
pub use raw::RawFormat;
pub use tar::{TarFormat, TarHeader};
pub use zip::{ZipSeekable, ZipStreamable};

//! The capability catalogue.
//!
//! Maps capability names to built-in collaborators and fixes the order
//! in which "all filters" and "all formats" are registered. Names that
//! are part of the vocabulary but have no implementation in this build
//! resolve to [`ArchiveError::Unsupported`].

use crate::ar::ArFormat;
use crate::codec::{CodecBidder, CodecKind};
use crate::cpio::CpioFormat;
use crate::empty::EmptyFormat;
use crate::gzip::GzipBidder;
use crate::raw::RawFormat;
use crate::tar::TarFormat;
use crate::zip::{ZipSeekable, ZipStreamable};
use unarc_core::error::{ArchiveError, Result};
use unarc_core::traits::{FilterBidder, FormatReader};

/// Decompression filters known by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    /// bzip2 (`BZh`).
    Bzip2,
    /// Unix `compress` (LZW, `.Z`).
    Compress,
    /// gzip (RFC 1952).
    Gzip,
    /// grzip.
    Grzip,
    /// lrzip.
    Lrzip,
    /// LZ4 frame.
    Lz4,
    /// lzip.
    Lzip,
    /// Legacy `.lzma`.
    Lzma,
    /// lzop.
    Lzop,
    /// RPM package wrapper.
    Rpm,
    /// uuencode.
    Uu,
    /// xz.
    Xz,
    /// Zstandard.
    Zstd,
}

impl FilterKind {
    /// Registration order for "all filters".
    pub const ALL: [FilterKind; 13] = [
        Self::Bzip2,
        Self::Compress,
        Self::Gzip,
        Self::Grzip,
        Self::Lrzip,
        Self::Lz4,
        Self::Lzip,
        Self::Lzma,
        Self::Lzop,
        Self::Rpm,
        Self::Uu,
        Self::Xz,
        Self::Zstd,
    ];

    /// Look a filter up by capability name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Capability name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bzip2 => "bzip2",
            Self::Compress => "compress",
            Self::Gzip => "gzip",
            Self::Grzip => "grzip",
            Self::Lrzip => "lrzip",
            Self::Lz4 => "lz4",
            Self::Lzip => "lzip",
            Self::Lzma => "lzma",
            Self::Lzop => "lzop",
            Self::Rpm => "rpm",
            Self::Uu => "uu",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }

    /// True when this build can decode the filter.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Bzip2 | Self::Gzip | Self::Xz | Self::Zstd)
    }

    /// A fresh bidder, or `None` when the filter is not built in.
    pub fn bidder(&self) -> Option<Box<dyn FilterBidder>> {
        match self {
            Self::Gzip => Some(Box::new(GzipBidder)),
            Self::Bzip2 => Some(Box::new(CodecBidder::new(CodecKind::Bzip2))),
            Self::Xz => Some(Box::new(CodecBidder::new(CodecKind::Xz))),
            Self::Zstd => Some(Box::new(CodecBidder::new(CodecKind::Zstd))),
            _ => None,
        }
    }
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Container formats known by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    /// Unix `ar`.
    Ar,
    /// cpio (newc, odc).
    Cpio,
    /// Zero-length input.
    Empty,
    /// LHA/LZH.
    Lha,
    /// BSD mtree manifest.
    Mtree,
    /// tar, all dialects.
    Tar,
    /// xar.
    Xar,
    /// WARC web archive.
    Warc,
    /// 7-Zip.
    SevenZip,
    /// Microsoft Cabinet.
    Cab,
    /// RAR 4.
    Rar,
    /// RAR 5.
    Rar5,
    /// ISO 9660 image.
    Iso9660,
    /// zip, both readers.
    Zip,
    /// zip, local headers only.
    ZipStreamable,
    /// zip, central directory.
    ZipSeekable,
    /// Whole stream as one entry.
    Raw,
}

impl FormatKind {
    /// Registration order for "all formats". `raw` accepts anything and is
    /// never part of it.
    pub const ALL: [FormatKind; 14] = [
        Self::Ar,
        Self::Cpio,
        Self::Empty,
        Self::Lha,
        Self::Mtree,
        Self::Tar,
        Self::Xar,
        Self::Warc,
        Self::SevenZip,
        Self::Cab,
        Self::Rar,
        Self::Rar5,
        Self::Iso9660,
        Self::Zip,
    ];

    /// Look a format up by capability name, including aliases.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "ar" => Self::Ar,
            "cpio" => Self::Cpio,
            "empty" => Self::Empty,
            "lha" => Self::Lha,
            "mtree" => Self::Mtree,
            "tar" | "gnutar" => Self::Tar,
            "xar" => Self::Xar,
            "warc" => Self::Warc,
            "7zip" => Self::SevenZip,
            "cab" => Self::Cab,
            "rar" => Self::Rar,
            "rar5" => Self::Rar5,
            "iso9660" => Self::Iso9660,
            "zip" => Self::Zip,
            "zip_streamable" => Self::ZipStreamable,
            "zip_seekable" => Self::ZipSeekable,
            "raw" => Self::Raw,
            _ => return None,
        })
    }

    /// Canonical capability name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ar => "ar",
            Self::Cpio => "cpio",
            Self::Empty => "empty",
            Self::Lha => "lha",
            Self::Mtree => "mtree",
            Self::Tar => "tar",
            Self::Xar => "xar",
            Self::Warc => "warc",
            Self::SevenZip => "7zip",
            Self::Cab => "cab",
            Self::Rar => "rar",
            Self::Rar5 => "rar5",
            Self::Iso9660 => "iso9660",
            Self::Zip => "zip",
            Self::ZipStreamable => "zip_streamable",
            Self::ZipSeekable => "zip_seekable",
            Self::Raw => "raw",
        }
    }

    /// True when this build can read the format.
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            Self::Ar
                | Self::Cpio
                | Self::Empty
                | Self::Tar
                | Self::Zip
                | Self::ZipStreamable
                | Self::ZipSeekable
                | Self::Raw
        )
    }

    /// Fresh readers for this format. `zip` expands to both variants.
    pub fn readers(&self) -> Vec<Box<dyn FormatReader>> {
        match self {
            Self::Ar => vec![boxed(ArFormat::new())],
            Self::Cpio => vec![boxed(CpioFormat::new())],
            Self::Empty => vec![boxed(EmptyFormat::new())],
            Self::Tar => vec![boxed(TarFormat::new())],
            Self::Zip => vec![boxed(ZipSeekable::new()), boxed(ZipStreamable::new())],
            Self::ZipStreamable => vec![boxed(ZipStreamable::new())],
            Self::ZipSeekable => vec![boxed(ZipSeekable::new())],
            Self::Raw => vec![boxed(RawFormat::new())],
            _ => Vec::new(),
        }
    }
}

fn boxed(format: impl FormatReader + 'static) -> Box<dyn FormatReader> {
    Box::new(format)
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolve a filter name to a bidder.
///
/// ```
/// use unarc_archive::detect::filter_by_name;
///
/// assert_eq!(filter_by_name("gzip").unwrap().name(), "gzip");
/// assert!(filter_by_name("lzop").is_err());
/// ```
pub fn filter_by_name(name: &str) -> Result<Box<dyn FilterBidder>> {
    FilterKind::from_name(name)
        .and_then(|kind| kind.bidder())
        .ok_or_else(|| ArchiveError::unsupported("filter", name))
}

/// Resolve a format name to its readers.
pub fn formats_by_name(name: &str) -> Result<Vec<Box<dyn FormatReader>>> {
    FormatKind::from_name(name)
        .filter(FormatKind::is_supported)
        .map(|kind| kind.readers())
        .ok_or_else(|| ArchiveError::unsupported("format", name))
}

/// Bidders for every supported filter, in priority order.
pub fn all_filters() -> Vec<Box<dyn FilterBidder>> {
    FilterKind::ALL
        .iter()
        .filter_map(FilterKind::bidder)
        .collect()
}

/// Readers for every supported format, in priority order.
pub fn all_formats() -> Vec<Box<dyn FormatReader>> {
    FormatKind::ALL
        .iter()
        .flat_map(FormatKind::readers)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use unarc_core::Status;

    #[test]
    fn test_names_round_trip() {
        for kind in FilterKind::ALL {
            assert_eq!(FilterKind::from_name(kind.name()), Some(kind));
        }
        for kind in FormatKind::ALL {
            assert_eq!(FormatKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(FormatKind::from_name("gnutar"), Some(FormatKind::Tar));
        assert_eq!(FormatKind::from_name("nonsense"), None);
    }

    #[test]
    fn test_unsupported_names_fail() {
        let err = filter_by_name("lz4").err().unwrap();
        assert_eq!(err.status(), Status::Failed);
        let err = formats_by_name("rar5").err().unwrap();
        assert_eq!(err.status(), Status::Failed);
        let err = formats_by_name("no-such-format").err().unwrap();
        assert_eq!(err.status(), Status::Failed);
    }

    #[test]
    fn test_all_formats_order() {
        let names: Vec<String> = all_formats().iter().map(|f| f.name().to_string()).collect();
        assert_eq!(
            names,
            ["ar", "cpio", "empty", "tar", "zip_seekable", "zip_streamable"]
        );
        let filters: Vec<String> = all_filters().iter().map(|f| f.name().to_string()).collect();
        assert_eq!(filters, ["bzip2", "gzip", "xz", "zstd"]);
    }

    #[test]
    fn test_zip_alias_expands() {
        let readers = formats_by_name("zip").unwrap();
        assert_eq!(readers.len(), 2);
        assert_eq!(formats_by_name("gnutar").unwrap()[0].name(), "tar");
    }
}

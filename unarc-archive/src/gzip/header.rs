//! GZIP member header parsing (RFC 1952).

use unarc_core::error::{ArchiveError, Result};

/// GZIP magic bytes.
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// GZIP compression method: DEFLATE.
pub const CM_DEFLATE: u8 = 8;

/// Size of the fixed part of the header.
pub const FIXED_LEN: usize = 10;

/// Size of the member trailer (CRC-32 + ISIZE).
pub const TRAILER_LEN: usize = 8;

/// GZIP header flags.
pub mod flags {
    /// Text file.
    pub const FTEXT: u8 = 0x01;
    /// Header CRC present.
    pub const FHCRC: u8 = 0x02;
    /// Extra field present.
    pub const FEXTRA: u8 = 0x04;
    /// Original filename present.
    pub const FNAME: u8 = 0x08;
    /// Comment present.
    pub const FCOMMENT: u8 = 0x10;
    /// Bits that must be zero.
    pub const RESERVED: u8 = 0xE0;
}

/// GZIP member header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GzipHeader {
    /// Flags.
    pub flags: u8,
    /// Modification time (Unix timestamp).
    pub mtime: u32,
    /// Extra flags.
    pub xfl: u8,
    /// Operating system.
    pub os: u8,
    /// Original filename (if FNAME flag set).
    pub filename: Option<String>,
    /// Comment (if FCOMMENT flag set).
    pub comment: Option<String>,
}

impl GzipHeader {
    /// Whether `head` starts like a gzip member this reader can decode.
    pub fn looks_like(head: &[u8]) -> bool {
        head.len() >= 4
            && head[..2] == GZIP_MAGIC
            && head[2] == CM_DEFLATE
            && head[3] & flags::RESERVED == 0
    }

    /// Parse a header from the start of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` ends before the header does, and
    /// otherwise the header together with its encoded length.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < FIXED_LEN {
            return Ok(None);
        }
        if buf[..2] != GZIP_MAGIC {
            return Err(ArchiveError::invalid_header("missing gzip magic"));
        }
        if buf[2] != CM_DEFLATE {
            return Err(ArchiveError::unsupported_method(format!(
                "gzip method {}",
                buf[2]
            )));
        }

        let flags = buf[3];
        if flags & flags::RESERVED != 0 {
            return Err(ArchiveError::invalid_header(format!(
                "reserved gzip flags set: {flags:#04x}"
            )));
        }

        let mut header = Self {
            flags,
            mtime: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            xfl: buf[8],
            os: buf[9],
            filename: None,
            comment: None,
        };
        let mut pos = FIXED_LEN;

        if flags & flags::FEXTRA != 0 {
            let Some(xlen) = buf.get(pos..pos + 2) else {
                return Ok(None);
            };
            pos += 2 + usize::from(u16::from_le_bytes([xlen[0], xlen[1]]));
            if pos > buf.len() {
                return Ok(None);
            }
        }

        if flags & flags::FNAME != 0 {
            let Some((name, next)) = null_terminated(buf, pos) else {
                return Ok(None);
            };
            header.filename = Some(name);
            pos = next;
        }

        if flags & flags::FCOMMENT != 0 {
            let Some((comment, next)) = null_terminated(buf, pos) else {
                return Ok(None);
            };
            header.comment = Some(comment);
            pos = next;
        }

        if flags & flags::FHCRC != 0 {
            let Some(stored) = buf.get(pos..pos + 2) else {
                return Ok(None);
            };
            let stored = u16::from_le_bytes([stored[0], stored[1]]);
            let computed = (crc32fast::hash(&buf[..pos]) & 0xffff) as u16;
            if stored != computed {
                return Err(ArchiveError::corrupted(
                    pos as u64,
                    format!("gzip header CRC {stored:#06x} != {computed:#06x}"),
                ));
            }
            pos += 2;
        }

        Ok(Some((header, pos)))
    }
}

/// The member trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GzipTrailer {
    /// CRC-32 of the uncompressed member.
    pub crc32: u32,
    /// Uncompressed size modulo 2^32.
    pub isize: u32,
}

impl GzipTrailer {
    /// Parse the 8-byte trailer.
    pub fn parse(buf: &[u8; TRAILER_LEN]) -> Self {
        Self {
            crc32: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            isize: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// Read a NUL-terminated string starting at `pos`.
fn null_terminated(buf: &[u8], pos: usize) -> Option<(String, usize)> {
    let len = buf.get(pos..)?.iter().position(|&b| b == 0)?;
    let text = String::from_utf8_lossy(&buf[pos..pos + len]).into_owned();
    Some((text, pos + len + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(flags: u8, tail: &[u8]) -> Vec<u8> {
        let mut buf = vec![0x1f, 0x8b, 8, flags, 0x10, 0x20, 0x30, 0x40, 0, 3];
        buf.extend_from_slice(tail);
        buf
    }

    #[test]
    fn test_parse_minimal() {
        let buf = header_bytes(0, b"");
        let (header, len) = GzipHeader::parse(&buf).unwrap().unwrap();
        assert_eq!(len, FIXED_LEN);
        assert_eq!(header.mtime, 0x4030_2010);
        assert_eq!(header.os, 3);
        assert!(GzipHeader::looks_like(&buf));
    }

    #[test]
    fn test_parse_optional_fields() {
        let buf = header_bytes(
            flags::FEXTRA | flags::FNAME | flags::FCOMMENT,
            b"\x02\x00abdata.txt\0note\0rest",
        );
        let (header, len) = GzipHeader::parse(&buf).unwrap().unwrap();
        assert_eq!(header.filename.as_deref(), Some("data.txt"));
        assert_eq!(header.comment.as_deref(), Some("note"));
        assert_eq!(&buf[len..], b"rest");
    }

    #[test]
    fn test_parse_incomplete() {
        let buf = header_bytes(flags::FNAME, b"unterminated");
        assert!(GzipHeader::parse(&buf).unwrap().is_none());
        assert!(GzipHeader::parse(&buf[..6]).unwrap().is_none());
    }

    #[test]
    fn test_header_crc() {
        let mut buf = header_bytes(flags::FHCRC, b"");
        let crc = (crc32fast::hash(&buf) & 0xffff) as u16;
        buf.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(GzipHeader::parse(&buf).unwrap().unwrap().1, 12);

        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        assert!(GzipHeader::parse(&buf).is_err());
    }

    #[test]
    fn test_rejects_reserved_flags() {
        let buf = header_bytes(0x20, b"");
        assert!(!GzipHeader::looks_like(&buf));
        assert!(GzipHeader::parse(&buf).is_err());
    }
}

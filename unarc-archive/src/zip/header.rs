//! ZIP header structures (PKWARE APPNOTE).

use crate::time::{dos_time, unix_time};
use unarc_core::entry::{Entry, EntryType};
use unarc_core::error::{ArchiveError, Result};

/// ZIP local file header signature.
pub const LOCAL_FILE_HEADER_SIG: u32 = 0x04034B50;
/// ZIP central directory header signature.
pub const CENTRAL_DIR_HEADER_SIG: u32 = 0x02014B50;
/// ZIP end of central directory signature.
pub const END_OF_CENTRAL_DIR_SIG: u32 = 0x06054B50;
/// ZIP64 end of central directory signature.
pub const ZIP64_END_OF_CENTRAL_DIR_SIG: u32 = 0x06064B50;
/// ZIP64 end of central directory locator signature.
pub const ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG: u32 = 0x07064B50;
/// Data descriptor signature (optional, PK\x07\x08).
pub const DATA_DESCRIPTOR_SIG: u32 = 0x08074B50;

/// ZIP64 extra field header ID.
pub const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;
/// Extended timestamp extra field.
pub const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;
/// Info-ZIP Unix uid/gid extra field.
pub const INFOZIP_UNIX_ID: u16 = 0x7875;

/// Marker value for Zip64 (0xFFFFFFFF for 32-bit fields).
pub const ZIP64_MARKER_32: u32 = 0xFFFF_FFFF;

/// Flag bit for encrypted entries.
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// Flag bit for data descriptor presence.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// Fixed size of a local file header.
pub const LOCAL_HEADER_LEN: usize = 30;
/// Fixed size of a central directory header.
pub const CENTRAL_HEADER_LEN: usize = 46;
/// Fixed size of the end of central directory record.
pub const EOCD_LEN: usize = 22;
/// Size of the zip64 end of central directory locator.
pub const ZIP64_LOCATOR_LEN: usize = 20;
/// Fixed size of the zip64 end of central directory record.
pub const ZIP64_EOCD_LEN: usize = 56;

/// "Version made by" host value for Unix.
const HOST_UNIX: u8 = 3;

pub(crate) fn le16(buf: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([buf[pos], buf[pos + 1]])
}

pub(crate) fn le32(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

pub(crate) fn le64(buf: &[u8], pos: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[pos..pos + 8]);
    u64::from_le_bytes(bytes)
}

/// ZIP compression methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Stored (no compression).
    Stored,
    /// Deflate compression.
    Deflate,
    /// Anything else.
    Unknown(u16),
}

impl CompressionMethod {
    /// Create from a u16 value.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Stored,
            8 => Self::Deflate,
            _ => Self::Unknown(value),
        }
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stored => write!(f, "stored"),
            Self::Deflate => write!(f, "deflate"),
            Self::Unknown(id) => write!(f, "zip method {id}"),
        }
    }
}

/// Values recovered from the extra field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields {
    /// Zip64 uncompressed size.
    pub uncompressed_size: Option<u64>,
    /// Zip64 compressed size.
    pub compressed_size: Option<u64>,
    /// Zip64 local header offset (central directory only).
    pub local_offset: Option<u64>,
    /// True when a zip64 record was present at all.
    pub zip64: bool,
    /// Extended timestamp: modification time.
    pub mtime: Option<i64>,
    /// Extended timestamp: access time.
    pub atime: Option<i64>,
    /// Extended timestamp: creation time.
    pub ctime: Option<i64>,
    /// Info-ZIP Unix owner.
    pub uid: Option<u64>,
    /// Info-ZIP Unix group.
    pub gid: Option<u64>,
}

impl ExtraFields {
    /// Walk the extra field records.
    ///
    /// The zip64 record only carries the values whose fixed-size fields
    /// hold the 0xFFFFFFFF marker, in a fixed order.
    pub fn parse(extra: &[u8], uncompressed: u32, compressed: u32, local_offset: u32) -> Self {
        let mut fields = Self::default();
        let mut offset = 0;
        while offset + 4 <= extra.len() {
            let id = le16(extra, offset);
            let size = usize::from(le16(extra, offset + 2));
            offset += 4;
            let Some(data) = extra.get(offset..offset + size) else {
                break;
            };
            offset += size;

            match id {
                ZIP64_EXTRA_FIELD_ID => {
                    fields.zip64 = true;
                    let mut pos = 0;
                    let mut next = |present: bool| -> Option<u64> {
                        if present && pos + 8 <= data.len() {
                            pos += 8;
                            Some(le64(data, pos - 8))
                        } else {
                            None
                        }
                    };
                    fields.uncompressed_size = next(uncompressed == ZIP64_MARKER_32);
                    fields.compressed_size = next(compressed == ZIP64_MARKER_32);
                    fields.local_offset = next(local_offset == ZIP64_MARKER_32);
                }
                EXTENDED_TIMESTAMP_ID if !data.is_empty() => {
                    let flags = data[0];
                    let mut pos = 1;
                    for (bit, slot) in [
                        (0x01, &mut fields.mtime),
                        (0x02, &mut fields.atime),
                        (0x04, &mut fields.ctime),
                    ] {
                        if flags & bit != 0 && pos + 4 <= data.len() {
                            *slot = Some(i64::from(le32(data, pos) as i32));
                            pos += 4;
                        }
                    }
                }
                INFOZIP_UNIX_ID if data.len() >= 3 && data[0] == 1 => {
                    let read_id = |pos: usize| -> Option<(u64, usize)> {
                        let len = usize::from(*data.get(pos)?);
                        let bytes = data.get(pos + 1..pos + 1 + len)?;
                        if len > 8 {
                            return None;
                        }
                        let value = bytes
                            .iter()
                            .rev()
                            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
                        Some((value, pos + 1 + len))
                    };
                    if let Some((uid, next)) = read_id(1) {
                        fields.uid = Some(uid);
                        fields.gid = read_id(next).map(|(gid, _)| gid);
                    }
                }
                _ => {}
            }
        }
        fields
    }
}

/// ZIP local file header.
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    /// Minimum version needed to extract.
    pub version_needed: u16,
    /// General purpose bit flag.
    pub flags: u16,
    /// Compression method.
    pub method: CompressionMethod,
    /// Last modification time (DOS).
    pub mtime: u16,
    /// Last modification date (DOS).
    pub mdate: u16,
    /// CRC-32 of uncompressed data (zero when deferred to a descriptor).
    pub crc32: u32,
    /// Compressed size, zip64 resolved.
    pub compressed_size: u64,
    /// Uncompressed size, zip64 resolved.
    pub uncompressed_size: u64,
    /// File name.
    pub filename: String,
    /// Parsed extra field.
    pub extra: ExtraFields,
}

impl LocalFileHeader {
    /// Parse a local file header from the start of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` is too short to hold the whole header,
    /// otherwise the header and its encoded length.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < LOCAL_HEADER_LEN {
            return Ok(None);
        }
        if le32(buf, 0) != LOCAL_FILE_HEADER_SIG {
            return Err(ArchiveError::invalid_header("missing zip local header signature"));
        }

        let name_len = usize::from(le16(buf, 26));
        let extra_len = usize::from(le16(buf, 28));
        let total = LOCAL_HEADER_LEN + name_len + extra_len;
        if buf.len() < total {
            return Ok(None);
        }

        let compressed = le32(buf, 18);
        let uncompressed = le32(buf, 22);
        let name = &buf[LOCAL_HEADER_LEN..LOCAL_HEADER_LEN + name_len];
        let extra = ExtraFields::parse(
            &buf[LOCAL_HEADER_LEN + name_len..total],
            uncompressed,
            compressed,
            0,
        );

        Ok(Some((
            Self {
                version_needed: le16(buf, 4),
                flags: le16(buf, 6),
                method: CompressionMethod::from_u16(le16(buf, 8)),
                mtime: le16(buf, 10),
                mdate: le16(buf, 12),
                crc32: le32(buf, 14),
                compressed_size: extra.compressed_size.unwrap_or(u64::from(compressed)),
                uncompressed_size: extra.uncompressed_size.unwrap_or(u64::from(uncompressed)),
                filename: String::from_utf8_lossy(name).into_owned(),
                extra,
            },
            total,
        )))
    }

    /// True when sizes and CRC follow the body in a data descriptor.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// True when the entry is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Populate an entry with what a local header knows.
    pub fn fill_entry(&self, entry: &mut Entry) {
        fill_common(entry, &self.filename, self.mtime, self.mdate, &self.extra);
        entry.entry_type = if self.filename.ends_with('/') {
            EntryType::Directory
        } else {
            EntryType::File
        };
        entry.attributes.unix_mode = Some(match entry.entry_type {
            EntryType::Directory => 0o755,
            _ => 0o644,
        });
        if !self.has_data_descriptor() {
            entry.crc32 = Some(self.crc32);
            entry.size = Some(self.uncompressed_size);
        } else if self.uncompressed_size != 0 {
            entry.size = Some(self.uncompressed_size);
        }
        if entry.is_dir() {
            entry.size = Some(0);
        }
    }
}

fn fill_common(entry: &mut Entry, name: &str, mtime: u16, mdate: u16, extra: &ExtraFields) {
    entry.name = name.to_string();
    entry.modified = match extra.mtime {
        Some(t) => unix_time(t, 0),
        None => dos_time(mtime, mdate),
    };
    entry.accessed = extra.atime.and_then(|t| unix_time(t, 0));
    entry.created = extra.ctime.and_then(|t| unix_time(t, 0));
    entry.attributes.uid = extra.uid;
    entry.attributes.gid = extra.gid;
}

/// ZIP central directory header.
#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader {
    /// Version made by (high byte is the host system).
    pub version_made_by: u16,
    /// General purpose bit flag.
    pub flags: u16,
    /// Compression method.
    pub method: CompressionMethod,
    /// Last modification time (DOS).
    pub mtime: u16,
    /// Last modification date (DOS).
    pub mdate: u16,
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size, zip64 resolved.
    pub compressed_size: u64,
    /// Uncompressed size, zip64 resolved.
    pub uncompressed_size: u64,
    /// External file attributes.
    pub external_attrs: u32,
    /// Offset of the local header, zip64 resolved.
    pub local_header_offset: u64,
    /// File name.
    pub filename: String,
    /// Parsed extra field.
    pub extra: ExtraFields,
}

impl CentralDirectoryHeader {
    /// Parse one record from the start of `buf`; returns it and its length.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < CENTRAL_HEADER_LEN || le32(buf, 0) != CENTRAL_DIR_HEADER_SIG {
            return Err(ArchiveError::invalid_header("bad zip central directory record"));
        }
        let name_len = usize::from(le16(buf, 28));
        let extra_len = usize::from(le16(buf, 30));
        let comment_len = usize::from(le16(buf, 32));
        let total = CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
        if buf.len() < total {
            return Err(ArchiveError::invalid_header("truncated zip central directory"));
        }

        let compressed = le32(buf, 20);
        let uncompressed = le32(buf, 24);
        let offset = le32(buf, 42);
        let name_end = CENTRAL_HEADER_LEN + name_len;
        let extra = ExtraFields::parse(
            &buf[name_end..name_end + extra_len],
            uncompressed,
            compressed,
            offset,
        );

        Ok((
            Self {
                version_made_by: le16(buf, 4),
                flags: le16(buf, 8),
                method: CompressionMethod::from_u16(le16(buf, 10)),
                mtime: le16(buf, 12),
                mdate: le16(buf, 14),
                crc32: le32(buf, 16),
                compressed_size: extra.compressed_size.unwrap_or(u64::from(compressed)),
                uncompressed_size: extra.uncompressed_size.unwrap_or(u64::from(uncompressed)),
                external_attrs: le32(buf, 38),
                local_header_offset: extra.local_offset.unwrap_or(u64::from(offset)),
                filename: String::from_utf8_lossy(&buf[CENTRAL_HEADER_LEN..name_end])
                    .into_owned(),
                extra,
            },
            total,
        ))
    }

    /// True when the entry is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Populate an entry from the central record, which is authoritative
    /// for sizes, CRC and permissions.
    pub fn fill_entry(&self, entry: &mut Entry) {
        fill_common(entry, &self.filename, self.mtime, self.mdate, &self.extra);
        entry.crc32 = Some(self.crc32);
        entry.size = Some(self.uncompressed_size);

        let dos = (self.external_attrs & 0xff) as u8;
        let unix_mode = self.external_attrs >> 16;
        if (self.version_made_by >> 8) as u8 == HOST_UNIX && unix_mode != 0 {
            entry.set_mode(unix_mode);
        } else if dos & 0x10 != 0 || self.filename.ends_with('/') {
            entry.entry_type = EntryType::Directory;
            entry.attributes.unix_mode = Some(0o755);
        } else {
            entry.entry_type = EntryType::File;
            entry.attributes.unix_mode = Some(if dos & 0x01 != 0 { 0o444 } else { 0o644 });
        }
        entry.attributes.dos_attributes = Some(dos);
        if entry.is_dir() {
            entry.size = Some(0);
        }
    }
}

/// Where the central directory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    /// Number of central directory records.
    pub entries: u64,
    /// Size of the central directory.
    pub cd_size: u64,
    /// Offset of the central directory.
    pub cd_offset: u64,
}

impl EndOfCentralDirectory {
    /// Locate the EOCD record within the archive tail.
    ///
    /// Searches backwards so that a signature inside the archive comment
    /// cannot shadow the real record.
    pub fn find(tail: &[u8]) -> Option<usize> {
        let sig = END_OF_CENTRAL_DIR_SIG.to_le_bytes();
        tail.windows(4).rposition(|w| w == sig).filter(|&pos| pos + EOCD_LEN <= tail.len())
    }

    /// Parse the 22-byte record.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < EOCD_LEN || le32(buf, 0) != END_OF_CENTRAL_DIR_SIG {
            return Err(ArchiveError::invalid_header("bad zip end of central directory"));
        }
        Ok(Self {
            entries: u64::from(le16(buf, 10)),
            cd_size: u64::from(le32(buf, 12)),
            cd_offset: u64::from(le32(buf, 16)),
        })
    }

    /// Parse a zip64 locator; returns the offset of the zip64 EOCD record.
    pub fn parse_zip64_locator(buf: &[u8]) -> Option<u64> {
        if buf.len() < ZIP64_LOCATOR_LEN || le32(buf, 0) != ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG {
            return None;
        }
        Some(le64(buf, 8))
    }

    /// Parse the zip64 EOCD record.
    pub fn parse_zip64(buf: &[u8]) -> Result<Self> {
        if buf.len() < ZIP64_EOCD_LEN || le32(buf, 0) != ZIP64_END_OF_CENTRAL_DIR_SIG {
            return Err(ArchiveError::invalid_header("bad zip64 end of central directory"));
        }
        Ok(Self {
            entries: le64(buf, 32),
            cd_size: le64(buf, 40),
            cd_offset: le64(buf, 48),
        })
    }
}

/// Trailing sizes and CRC for entries written in streaming mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size.
    pub compressed_size: u64,
    /// Uncompressed size.
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Encoded length, with or without the optional signature.
    pub fn encoded_len(signed: bool, zip64: bool) -> usize {
        let sizes = if zip64 { 16 } else { 8 };
        4 + sizes + if signed { 4 } else { 0 }
    }

    /// Whether a descriptor at the start of `buf` carries the signature.
    pub fn is_signed(buf: &[u8]) -> bool {
        buf.len() >= 4 && le32(buf, 0) == DATA_DESCRIPTOR_SIG
    }

    /// Parse a descriptor whose full encoding is in `buf`.
    pub fn parse(buf: &[u8], signed: bool, zip64: bool) -> Self {
        let base = if signed { 4 } else { 0 };
        let crc32 = le32(buf, base);
        if zip64 {
            Self {
                crc32,
                compressed_size: le64(buf, base + 4),
                uncompressed_size: le64(buf, base + 12),
            }
        } else {
            Self {
                crc32,
                compressed_size: u64::from(le32(buf, base + 4)),
                uncompressed_size: u64::from(le32(buf, base + 8)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_header(name: &str, flags: u16, extra: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
        buf.extend_from_slice(&20u16.to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&8u16.to_le_bytes());
        buf.extend_from_slice(&0x6000u16.to_le_bytes());
        buf.extend_from_slice(&0x5821u16.to_le_bytes());
        buf.extend_from_slice(&0xdeadbeefu32.to_le_bytes());
        buf.extend_from_slice(&ZIP64_MARKER_32.to_le_bytes());
        buf.extend_from_slice(&ZIP64_MARKER_32.to_le_bytes());
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(extra);
        buf
    }

    #[test]
    fn test_local_header_zip64() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&ZIP64_EXTRA_FIELD_ID.to_le_bytes());
        extra.extend_from_slice(&16u16.to_le_bytes());
        extra.extend_from_slice(&(5u64 << 32).to_le_bytes());
        extra.extend_from_slice(&(3u64 << 32).to_le_bytes());
        let buf = local_header("big.bin", 0, &extra);

        let (header, len) = LocalFileHeader::parse(&buf).unwrap().unwrap();
        assert_eq!(len, buf.len());
        assert_eq!(header.filename, "big.bin");
        assert_eq!(header.method, CompressionMethod::Deflate);
        assert_eq!(header.uncompressed_size, 5 << 32);
        assert_eq!(header.compressed_size, 3 << 32);
        assert!(header.extra.zip64);
        assert!(LocalFileHeader::parse(&buf[..buf.len() - 1]).unwrap().is_none());
    }

    #[test]
    fn test_extended_timestamp() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&EXTENDED_TIMESTAMP_ID.to_le_bytes());
        extra.extend_from_slice(&5u16.to_le_bytes());
        extra.push(0x01);
        extra.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        let fields = ExtraFields::parse(&extra, 0, 0, 0);
        assert_eq!(fields.mtime, Some(1_700_000_000));
        assert!(!fields.zip64);
    }

    #[test]
    fn test_infozip_unix_ids() {
        let extra = [
            0x75, 0x78, 11, 0, 1, 4, 0xe8, 0x03, 0, 0, 4, 0x64, 0, 0, 0,
        ];
        let fields = ExtraFields::parse(&extra, 0, 0, 0);
        assert_eq!(fields.uid, Some(1000));
        assert_eq!(fields.gid, Some(100));
    }

    #[test]
    fn test_find_eocd_skips_short_match() {
        let mut tail = vec![0u8; 10];
        tail.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        tail.extend_from_slice(&[0u8; 6]);
        tail.extend_from_slice(&3u16.to_le_bytes());
        tail.extend_from_slice(&100u32.to_le_bytes());
        tail.extend_from_slice(&200u32.to_le_bytes());
        tail.extend_from_slice(&0u16.to_le_bytes());

        let pos = EndOfCentralDirectory::find(&tail).unwrap();
        assert_eq!(pos, 10);
        let eocd = EndOfCentralDirectory::parse(&tail[pos..]).unwrap();
        assert_eq!(eocd.entries, 3);
        assert_eq!(eocd.cd_size, 100);
        assert_eq!(eocd.cd_offset, 200);

        assert!(EndOfCentralDirectory::find(&tail[..20]).is_none());
    }

    #[test]
    fn test_data_descriptor() {
        let mut buf = DATA_DESCRIPTOR_SIG.to_le_bytes().to_vec();
        buf.extend_from_slice(&0x1234u32.to_le_bytes());
        buf.extend_from_slice(&10u32.to_le_bytes());
        buf.extend_from_slice(&20u32.to_le_bytes());
        assert!(DataDescriptor::is_signed(&buf));
        assert_eq!(DataDescriptor::encoded_len(true, false), buf.len());
        let desc = DataDescriptor::parse(&buf, true, false);
        assert_eq!(desc.crc32, 0x1234);
        assert_eq!(desc.uncompressed_size, 20);
    }
}

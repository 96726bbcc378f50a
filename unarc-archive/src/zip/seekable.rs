//! Zip reader driven by the central directory.
//!
//! Needs random access: the central directory sits at the end of the
//! archive. In exchange it sees what streaming cannot: Unix permissions,
//! symlinks, and the correct sizes for entries written with data
//! descriptors.

use super::header::{
    CentralDirectoryHeader, EOCD_LEN, END_OF_CENTRAL_DIR_SIG, EndOfCentralDirectory,
    LOCAL_FILE_HEADER_SIG, LOCAL_HEADER_LEN, LocalFileHeader, ZIP64_EOCD_LEN, ZIP64_LOCATOR_LEN,
    le32,
};
use super::member::{Member, MemberLayout};
use log::{debug, trace};
use unarc_core::entry::{Entry, EntryType};
use unarc_core::error::{ArchiveError, Result};
use unarc_core::io::Whence;
use unarc_core::stream::Upstream;
use unarc_core::traits::{FormatReader, Header};

/// Largest possible EOCD record plus comment.
const MAX_EOCD_SEARCH: u64 = EOCD_LEN as u64 + u16::MAX as u64;

/// Symlink targets longer than this are left in the body.
const MAX_LINK_TARGET: u64 = 4096;

/// Central-directory zip reader.
#[derive(Debug)]
pub struct ZipSeekable {
    directory: Option<Vec<CentralDirectoryHeader>>,
    next: usize,
    member: Member,
    header_offset: Option<u64>,
}

impl ZipSeekable {
    /// Create a new seeking zip reader.
    pub fn new() -> Self {
        Self {
            directory: None,
            next: 0,
            member: Member::finished(),
            header_offset: None,
        }
    }

    fn seek_to(stream: &mut dyn Upstream, offset: u64) -> Result<()> {
        let target = i64::try_from(offset)
            .map_err(|_| ArchiveError::invalid_header(format!("zip offset {offset} too large")))?;
        stream.seek(target, Whence::Set)?;
        Ok(())
    }

    /// Read the last bytes of the archive and locate the EOCD record in
    /// them. Returns the archive length, the tail and the record's offset
    /// within the tail.
    fn read_tail(stream: &mut dyn Upstream) -> Result<(u64, Vec<u8>, Option<usize>)> {
        let end = stream.seek(0, Whence::End)?;
        let tail_len = end.min(MAX_EOCD_SEARCH);
        Self::seek_to(stream, end - tail_len)?;
        let tail = stream.take_vec(tail_len as usize)?;
        let pos = EndOfCentralDirectory::find(&tail);
        Ok((end, tail, pos))
    }

    /// Find the (zip64) end of central directory record and read the
    /// whole central directory.
    fn load_directory(stream: &mut dyn Upstream) -> Result<Vec<CentralDirectoryHeader>> {
        let (end, tail, pos) = Self::read_tail(stream)?;
        let pos =
            pos.ok_or_else(|| ArchiveError::invalid_header("zip end of central directory not found"))?;
        let mut eocd = EndOfCentralDirectory::parse(&tail[pos..])?;

        if pos >= ZIP64_LOCATOR_LEN {
            let locator = &tail[pos - ZIP64_LOCATOR_LEN..pos];
            if let Some(zip64_offset) = EndOfCentralDirectory::parse_zip64_locator(locator) {
                Self::seek_to(stream, zip64_offset)?;
                let record = stream.take_vec(ZIP64_EOCD_LEN)?;
                eocd = EndOfCentralDirectory::parse_zip64(&record)?;
            }
        }
        debug!(
            "zip: central directory of {} entries, {} bytes at {}",
            eocd.entries, eocd.cd_size, eocd.cd_offset
        );

        if eocd.cd_offset.saturating_add(eocd.cd_size) > end {
            return Err(ArchiveError::invalid_header("zip central directory out of range"));
        }
        Self::seek_to(stream, eocd.cd_offset)?;
        let raw = stream.take_vec(eocd.cd_size as usize)?;

        let mut directory = Vec::new();
        let mut pos = 0;
        while pos < raw.len() && (directory.len() as u64) < eocd.entries {
            let (header, len) = CentralDirectoryHeader::parse(&raw[pos..])?;
            trace!("zip: central record {:?} at {}", header.filename, header.local_header_offset);
            directory.push(header);
            pos += len;
        }
        Ok(directory)
    }

    /// Read a short symlink body into the entry.
    fn read_link_target(&mut self, stream: &mut dyn Upstream, entry: &mut Entry) -> Result<()> {
        let mut target = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let n = self.member.read(stream, &mut buf)?;
            if n == 0 {
                break;
            }
            target.extend_from_slice(&buf[..n]);
        }
        entry.link_target = Some(String::from_utf8_lossy(&target).into_owned().into());
        entry.size = Some(0);
        Ok(())
    }
}

impl Default for ZipSeekable {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatReader for ZipSeekable {
    fn name(&self) -> &str {
        "zip_seekable"
    }

    fn requires_seek(&self) -> bool {
        true
    }

    fn bid(&mut self, stream: &mut dyn Upstream) -> Result<u32> {
        if !stream.seekable() {
            return Ok(0);
        }
        let head = stream.peek(4)?;
        if head.len() < 4 {
            return Ok(0);
        }
        // An archive with no members is just the EOCD record
        if !matches!(le32(head, 0), LOCAL_FILE_HEADER_SIG | END_OF_CENTRAL_DIR_SIG) {
            return Ok(0);
        }

        // Without a central directory only the streaming reader can help.
        let start = stream.position();
        let tail = Self::read_tail(stream);
        Self::seek_to(stream, start)?;
        if tail?.2.is_none() {
            trace!("zip: no end of central directory record, not bidding");
            return Ok(0);
        }
        Ok(32)
    }

    fn read_header(&mut self, stream: &mut dyn Upstream, entry: &mut Entry) -> Result<Header> {
        if self.directory.is_none() {
            self.directory = Some(Self::load_directory(stream)?);
        }
        let Some(record) = self.directory.as_ref().and_then(|d| d.get(self.next)) else {
            return Ok(Header::End);
        };

        Self::seek_to(stream, record.local_header_offset)?;
        self.header_offset = Some(record.local_header_offset);
        let mut want = LOCAL_HEADER_LEN;
        let (local, len) = loop {
            let buf = stream.peek(want)?;
            if let Some(parsed) = LocalFileHeader::parse(buf)? {
                break parsed;
            }
            if buf.len() < want {
                return Err(ArchiveError::unexpected_eof((want - buf.len()) as u64));
            }
            want = buf.len() * 2;
        };
        stream.consume(len);
        if local.filename != record.filename {
            debug!(
                "zip: local name {:?} differs from central name {:?}",
                local.filename, record.filename
            );
        }

        record.fill_entry(entry);
        if entry.accessed.is_none() {
            entry.accessed = local.extra.atime.and_then(|t| crate::time::unix_time(t, 0));
        }
        self.member = Member::new(MemberLayout {
            name: &record.filename,
            method: record.method,
            encrypted: record.is_encrypted(),
            compressed_size: Some(record.compressed_size),
            crc32: record.crc32,
            descriptor: None,
        });

        if entry.entry_type == EntryType::Symlink && record.uncompressed_size <= MAX_LINK_TARGET {
            self.read_link_target(stream, entry)?;
        }
        self.next += 1;
        Ok(Header::Entry)
    }

    fn header_offset(&self) -> Option<u64> {
        self.header_offset
    }

    fn read_data(&mut self, stream: &mut dyn Upstream, buf: &mut [u8]) -> Result<usize> {
        self.member.read(stream, buf)
    }

    fn skip_data(&mut self, _stream: &mut dyn Upstream) -> Result<()> {
        // The next header seeks to its own offset.
        self.member = Member::finished();
        Ok(())
    }
}

//! Zip reader that walks local headers front to back.
//!
//! Works on any stream, including filtered ones, at the cost of trusting
//! local headers: permissions and comments only live in the central
//! directory and are not available here.

use super::header::{
    CENTRAL_DIR_HEADER_SIG, DATA_DESCRIPTOR_SIG, END_OF_CENTRAL_DIR_SIG, LOCAL_FILE_HEADER_SIG,
    LOCAL_HEADER_LEN, LocalFileHeader, ZIP64_END_OF_CENTRAL_DIR_SIG, le32,
};
use super::member::{Member, MemberLayout};
use log::{debug, trace};
use unarc_core::entry::Entry;
use unarc_core::error::{ArchiveError, Result};
use unarc_core::stream::Upstream;
use unarc_core::traits::{FormatReader, Header};

/// Streaming zip reader.
#[derive(Debug)]
pub struct ZipStreamable {
    member: Member,
}

impl ZipStreamable {
    /// Create a new streaming zip reader.
    pub fn new() -> Self {
        Self {
            member: Member::finished(),
        }
    }
}

impl Default for ZipStreamable {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatReader for ZipStreamable {
    fn name(&self) -> &str {
        "zip_streamable"
    }

    fn bid(&mut self, stream: &mut dyn Upstream) -> Result<u32> {
        let head = stream.peek(4)?;
        if head.len() < 4 {
            return Ok(0);
        }
        Ok(match le32(head, 0) {
            LOCAL_FILE_HEADER_SIG => 29,
            // Split-archive marker ahead of the first local header
            DATA_DESCRIPTOR_SIG => {
                let head = stream.peek(8)?;
                if head.len() >= 8 && le32(head, 4) == LOCAL_FILE_HEADER_SIG {
                    29
                } else {
                    0
                }
            }
            _ => 0,
        })
    }

    fn read_header(&mut self, stream: &mut dyn Upstream, entry: &mut Entry) -> Result<Header> {
        self.member.skip(stream)?;

        let offset = stream.position();
        let head = stream.peek(4)?;
        if head.is_empty() {
            debug!("zip: end of stream without central directory");
            return Ok(Header::End);
        }
        if head.len() < 4 {
            return Err(ArchiveError::unexpected_eof((4 - head.len()) as u64));
        }
        match le32(head, 0) {
            LOCAL_FILE_HEADER_SIG => {}
            CENTRAL_DIR_HEADER_SIG | END_OF_CENTRAL_DIR_SIG | ZIP64_END_OF_CENTRAL_DIR_SIG => {
                return Ok(Header::End);
            }
            DATA_DESCRIPTOR_SIG if offset == 0 => {
                stream.consume(4);
                return self.read_header(stream, entry);
            }
            sig => {
                return Err(ArchiveError::invalid_header(format!(
                    "unexpected zip signature {sig:#010x} at offset {offset}"
                )));
            }
        }

        let mut want = LOCAL_HEADER_LEN;
        let (header, len) = loop {
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
        trace!(
            "zip: local header {:?} method {} flags {:#06x} at {}",
            header.filename, header.method, header.flags, offset
        );

        header.fill_entry(entry);

        let descriptor = header.has_data_descriptor();
        // Writers that stream set bit 3 and leave the sizes zero; some
        // still fill them in.
        let compressed_size = if descriptor && header.compressed_size == 0 {
            None
        } else {
            Some(header.compressed_size)
        };
        self.member = Member::new(MemberLayout {
            name: &header.filename,
            method: header.method,
            encrypted: header.is_encrypted(),
            compressed_size,
            crc32: header.crc32,
            descriptor: descriptor.then_some(header.extra.zip64),
        });

        if self.member.is_unbounded() && !header.is_encrypted() {
            // Nothing after this entry can be located without the central
            // directory.
            return Err(ArchiveError::corrupted(
                offset,
                format!(
                    "{}: stored entry with a data descriptor cannot be streamed",
                    entry.name
                ),
            ));
        }
        Ok(Header::Entry)
    }

    fn read_data(&mut self, stream: &mut dyn Upstream, buf: &mut [u8]) -> Result<usize> {
        self.member.read(stream, buf)
    }

    fn skip_data(&mut self, stream: &mut dyn Upstream) -> Result<()> {
        self.member.skip(stream)
    }
}

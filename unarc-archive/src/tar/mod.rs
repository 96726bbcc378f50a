//! TAR archive format support.
//!
//! Reads v7, POSIX ustar and GNU headers, including:
//! - PAX extended headers (POSIX.1-2001), local and global
//! - GNU LongName / LongLink members
//! - GNU base-256 numeric fields
//!
//! Headers are parsed one 512-byte block at a time from the decoded stream.
//! Metadata members (pax records, long names) are accumulated on the
//! format itself, so a transient failure between them loses nothing.

mod header;

pub use header::{
    BLOCK_SIZE, Checksum, Flavor, TarHeader, is_zero_block, parse_numeric, parse_pax_data,
    verify_checksum,
};

use crate::body::Body;
use header::{
    GNU_LONGLINK, GNU_LONGNAME, GNU_SPARSE, GNU_VOLHDR, PAX_GLOBAL_HEADER, PAX_HEADER, apply_pax,
    parse_string,
};
use log::{debug, trace};
use unarc_core::entry::{Entry, EntryType};
use unarc_core::error::{ArchiveError, Result};
use unarc_core::stream::Upstream;
use unarc_core::traits::{FormatReader, Header};

/// Metadata members larger than this are rejected as corrupt.
const MAX_METADATA_SIZE: u64 = 1 << 20;

/// A metadata member whose header was consumed but whose body was not.
#[derive(Debug, Clone, Copy)]
struct PendingMeta {
    typeflag: u8,
    size: u64,
}

/// Streaming TAR reader.
#[derive(Debug, Default)]
pub struct TarFormat {
    global_pax: Vec<(String, String)>,
    local_pax: Vec<(String, String)>,
    long_name: Option<String>,
    long_link: Option<String>,
    meta: Option<PendingMeta>,
    body: Body,
}

impl TarFormat {
    /// Create a new TAR reader.
    pub fn new() -> Self {
        Self::default()
    }

    fn read_metadata(&mut self, stream: &mut dyn Upstream, meta: PendingMeta) -> Result<()> {
        let padded = meta.size + Body::padding_for(meta.size, BLOCK_SIZE as u64);
        let data = stream.take_vec(padded as usize)?;
        let data = &data[..meta.size as usize];
        match meta.typeflag {
            PAX_HEADER => self.local_pax = parse_pax_data(data)?,
            PAX_GLOBAL_HEADER => self.global_pax.extend(parse_pax_data(data)?),
            GNU_LONGNAME => self.long_name = Some(parse_string(data)),
            GNU_LONGLINK => self.long_link = Some(parse_string(data)),
            _ => {}
        }
        self.meta = None;
        Ok(())
    }

    /// Handle an all-zero block: the end-of-archive marker.
    fn end_of_archive(stream: &mut dyn Upstream) -> Header {
        stream.consume(BLOCK_SIZE);
        // The second zero block is optional; swallow it when present.
        if let Ok(next) = stream.peek(BLOCK_SIZE) {
            if next.len() >= BLOCK_SIZE && is_zero_block(&next[..BLOCK_SIZE]) {
                stream.consume(BLOCK_SIZE);
            } else {
                debug!("tar: archive terminated by a single zero block");
            }
        }
        Header::End
    }
}

impl FormatReader for TarFormat {
    fn name(&self) -> &str {
        "tar"
    }

    fn bid(&mut self, stream: &mut dyn Upstream) -> Result<u32> {
        let head = stream.peek(BLOCK_SIZE)?;
        if head.len() < BLOCK_SIZE {
            return Ok(0);
        }
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&head[..BLOCK_SIZE]);

        if is_zero_block(&block) {
            // An archive holding nothing but its end marker
            return Ok(10);
        }
        if verify_checksum(&block) == Checksum::Invalid {
            return Ok(0);
        }

        let mut bid = 48;
        if header::flavor(&block) != Flavor::V7 {
            bid += 56;
        }
        Ok(bid)
    }

    fn read_header(&mut self, stream: &mut dyn Upstream, entry: &mut Entry) -> Result<Header> {
        loop {
            // Leftovers of the previous member or of a volume label
            self.body.finish(stream)?;
            if let Some(meta) = self.meta {
                self.read_metadata(stream, meta)?;
            }

            let offset = stream.position();
            let head = stream.peek(BLOCK_SIZE)?;
            if head.is_empty() {
                debug!("tar: end of stream without end-of-archive marker");
                return Ok(Header::End);
            }
            if head.len() < BLOCK_SIZE {
                return Err(ArchiveError::unexpected_eof((BLOCK_SIZE - head.len()) as u64));
            }
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(&head[..BLOCK_SIZE]);

            if is_zero_block(&block) {
                return Ok(Self::end_of_archive(stream));
            }

            let warning = match verify_checksum(&block) {
                Checksum::Valid => None,
                Checksum::Signed => {
                    Some(format!("tar header at offset {offset} uses a signed checksum"))
                }
                Checksum::Invalid => {
                    return Err(ArchiveError::invalid_header(format!(
                        "tar checksum mismatch at offset {offset}"
                    )));
                }
            };

            let header = TarHeader::from_block(&block)?;
            stream.consume(BLOCK_SIZE);
            trace!(
                "tar: header {:?} type {:?} size {} at {}",
                header.name, header.typeflag as char, header.size, offset
            );

            if header.typeflag == GNU_VOLHDR {
                self.body = Body::new(
                    header.size,
                    Body::padding_for(header.size, BLOCK_SIZE as u64),
                );
                continue;
            }
            if header.is_metadata() {
                if header.size > MAX_METADATA_SIZE {
                    return Err(ArchiveError::corrupted(
                        offset,
                        format!("metadata member of {} bytes", header.size),
                    ));
                }
                self.meta = Some(PendingMeta {
                    typeflag: header.typeflag,
                    size: header.size,
                });
                continue;
            }

            header.fill_entry(entry);
            let mut body_size = header.size;
            if let Some(size) = apply_pax(&self.global_pax, entry) {
                body_size = size;
            }
            if let Some(size) = apply_pax(&std::mem::take(&mut self.local_pax), entry) {
                body_size = size;
            }
            if let Some(name) = self.long_name.take() {
                entry.name = name;
            }
            if let Some(link) = self.long_link.take() {
                match entry.entry_type {
                    EntryType::Hardlink => entry.hardlink = Some(link),
                    _ => entry.link_target = Some(link.into()),
                }
            }
            // Hard links may carry a size but no data
            if entry.entry_type == EntryType::Hardlink {
                body_size = 0;
            }

            self.body = Body::new(body_size, Body::padding_for(body_size, BLOCK_SIZE as u64));

            if header.typeflag == GNU_SPARSE {
                return Ok(Header::Warning(format!(
                    "{}: GNU sparse member is returned unexpanded",
                    entry.name
                )));
            }
            return Ok(match warning {
                Some(message) => Header::Warning(message),
                None => Header::Entry,
            });
        }
    }

    fn read_data(&mut self, stream: &mut dyn Upstream, buf: &mut [u8]) -> Result<usize> {
        self.body.read(stream, buf)
    }

    fn skip_data(&mut self, stream: &mut dyn Upstream) -> Result<()> {
        self.body.finish(stream)
    }
}

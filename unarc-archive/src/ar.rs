//! Unix `ar` archive support (static libraries, `.deb` outer layer).
//!
//! Handles the common `!<arch>` layout with both long-name schemes:
//! GNU (a `//` string table referenced as `/<offset>`) and BSD
//! (`#1/<len>`, the name prefixed to the member body). Symbol tables are
//! skipped.

use crate::body::Body;
use crate::time::unix_time;
use log::trace;
use unarc_core::entry::Entry;
use unarc_core::error::{ArchiveError, Result};
use unarc_core::stream::Upstream;
use unarc_core::traits::{FormatReader, Header};

/// Global archive magic.
pub const AR_MAGIC: &[u8; 8] = b"!<arch>\n";

const HEADER_LEN: usize = 60;
const MAX_TABLE: u64 = 1 << 24;

/// Streaming `ar` reader.
#[derive(Debug, Default)]
pub struct ArFormat {
    started: bool,
    strtab: Option<Vec<u8>>,
    body: Body,
}

impl ArFormat {
    /// Create a new `ar` reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a GNU `/<offset>` name through the string table.
    fn long_name(&self, offset: &str) -> Result<String> {
        let table = self
            .strtab
            .as_deref()
            .ok_or_else(|| ArchiveError::invalid_header("ar long name without a string table"))?;
        let start: usize = offset
            .parse()
            .map_err(|_| ArchiveError::invalid_header(format!("bad ar name offset {offset:?}")))?;
        let rest = table
            .get(start..)
            .ok_or_else(|| ArchiveError::invalid_header("ar name offset past string table"))?;
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(rest.len());
        let name = String::from_utf8_lossy(&rest[..end]);
        Ok(name.trim_end_matches('/').to_string())
    }
}

fn field(header: &[u8], range: std::ops::Range<usize>) -> &str {
    std::str::from_utf8(&header[range]).unwrap_or("").trim_end()
}

fn number(header: &[u8], range: std::ops::Range<usize>, radix: u32, name: &str) -> Result<u64> {
    let text = field(header, range);
    if text.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(text, radix)
        .map_err(|_| ArchiveError::invalid_header(format!("invalid ar {name}: {text:?}")))
}

impl FormatReader for ArFormat {
    fn name(&self) -> &str {
        "ar"
    }

    fn bid(&mut self, stream: &mut dyn Upstream) -> Result<u32> {
        let head = stream.peek(AR_MAGIC.len())?;
        Ok(if head.starts_with(AR_MAGIC) { 64 } else { 0 })
    }

    fn read_header(&mut self, stream: &mut dyn Upstream, entry: &mut Entry) -> Result<Header> {
        if !self.started {
            let magic = stream.take_vec(AR_MAGIC.len())?;
            if magic != AR_MAGIC {
                return Err(ArchiveError::invalid_header("missing !<arch> magic"));
            }
            self.started = true;
        }

        loop {
            self.body.finish(stream)?;

            let offset = stream.position();
            let head = stream.peek(HEADER_LEN)?;
            if head.is_empty() {
                return Ok(Header::End);
            }
            if head.len() < HEADER_LEN {
                return Err(ArchiveError::unexpected_eof((HEADER_LEN - head.len()) as u64));
            }
            let header = head[..HEADER_LEN].to_vec();
            if &header[58..60] != b"`\n" {
                return Err(ArchiveError::invalid_header(format!(
                    "bad ar member trailer at offset {offset}"
                )));
            }

            let raw_name = field(&header, 0..16).to_string();
            let size = number(&header, 48..58, 10, "size")?;
            let padding = size % 2;
            trace!("ar: member {:?} size {} at {}", raw_name, size, offset);

            match raw_name.as_str() {
                "/" | "/SYM64/" | "__.SYMDEF" | "__.SYMDEF SORTED" => {
                    stream.consume(HEADER_LEN);
                    self.body = Body::new(size, padding);
                    continue;
                }
                "//" => {
                    if size > MAX_TABLE {
                        return Err(ArchiveError::corrupted(offset, "oversized ar string table"));
                    }
                    let record = stream.take_vec(HEADER_LEN + (size + padding) as usize)?;
                    self.strtab = Some(record[HEADER_LEN..HEADER_LEN + size as usize].to_vec());
                    continue;
                }
                _ => {}
            }

            let mut data_size = size;
            let name = if let Some(len) = raw_name.strip_prefix("#1/") {
                let len: u64 = len
                    .parse()
                    .map_err(|_| ArchiveError::invalid_header("bad BSD ar name length"))?;
                if len > size {
                    return Err(ArchiveError::invalid_header("BSD ar name longer than member"));
                }
                let record = stream.take_vec(HEADER_LEN + len as usize)?;
                data_size -= len;
                let name = &record[HEADER_LEN..];
                let name = &name[..name.iter().position(|&b| b == 0).unwrap_or(name.len())];
                String::from_utf8_lossy(name).into_owned()
            } else if let Some(index) = raw_name.strip_prefix('/') {
                let name = self.long_name(index)?;
                stream.consume(HEADER_LEN);
                name
            } else {
                stream.consume(HEADER_LEN);
                raw_name.trim_end_matches('/').to_string()
            };

            entry.name = name;
            entry.set_mode(number(&header, 40..48, 8, "mode")? as u32);
            entry.attributes.uid = Some(number(&header, 28..34, 10, "uid")?);
            entry.attributes.gid = Some(number(&header, 34..40, 10, "gid")?);
            entry.modified = unix_time(number(&header, 16..28, 10, "date")? as i64, 0);
            entry.size = Some(data_size);
            self.body = Body::new(data_size, padding);
            return Ok(Header::Entry);
        }
    }

    fn read_data(&mut self, stream: &mut dyn Upstream, buf: &mut [u8]) -> Result<usize> {
        self.body.read(stream, buf)
    }

    fn skip_data(&mut self, stream: &mut dyn Upstream) -> Result<()> {
        self.body.finish(stream)
    }
}

//! CPIO archive format support.
//!
//! Two ASCII header layouts are read:
//! - SVR4 "newc" (`070701`) and its CRC variant (`070702`): hex fields,
//!   name and body padded to 4 bytes
//! - POSIX.1 portable "odc" (`070707`): octal fields, no padding
//!
//! Symlink targets are stored as the member body; they are moved into
//! [`Entry::link_target`] and the body is reported as empty.

use crate::body::Body;
use crate::time::unix_time;
use log::{debug, trace};
use unarc_core::entry::{DeviceNumber, Entry, EntryType};
use unarc_core::error::{ArchiveError, Result};
use unarc_core::stream::Upstream;
use unarc_core::traits::{FormatReader, Header};

/// Name of the member that terminates an archive.
pub const TRAILER: &str = "TRAILER!!!";

const NEWC_LEN: usize = 110;
const ODC_LEN: usize = 76;
const MAX_NAME: u64 = 1 << 16;
const MAX_LINK: u64 = 1 << 16;

/// Header layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// `070701`
    Newc,
    /// `070702`
    NewcCrc,
    /// `070707`
    Odc,
}

impl Variant {
    /// Identify the layout from the six magic bytes.
    pub fn from_magic(magic: &[u8]) -> Option<Self> {
        match magic.get(..6)? {
            b"070701" => Some(Self::Newc),
            b"070702" => Some(Self::NewcCrc),
            b"070707" => Some(Self::Odc),
            _ => None,
        }
    }

    fn header_len(self) -> usize {
        match self {
            Self::Newc | Self::NewcCrc => NEWC_LEN,
            Self::Odc => ODC_LEN,
        }
    }

    fn align(self) -> u64 {
        match self {
            Self::Newc | Self::NewcCrc => 4,
            Self::Odc => 1,
        }
    }
}

/// Fixed header fields common to both layouts.
#[derive(Debug, Clone)]
struct Fields {
    dev: DeviceNumber,
    ino: u64,
    mode: u32,
    uid: u64,
    gid: u64,
    nlink: u32,
    rdev: DeviceNumber,
    mtime: i64,
    namesize: u64,
    filesize: u64,
}

fn number(field: &[u8], radix: u32, name: &str) -> Result<u64> {
    let text = std::str::from_utf8(field)
        .map_err(|_| ArchiveError::invalid_header(format!("cpio {name} is not ASCII")))?;
    u64::from_str_radix(text, radix)
        .map_err(|_| ArchiveError::invalid_header(format!("invalid cpio {name}: {text:?}")))
}

fn parse_newc(h: &[u8]) -> Result<Fields> {
    let field = |i: usize, name: &str| number(&h[6 + i * 8..14 + i * 8], 16, name);
    Ok(Fields {
        ino: field(0, "ino")?,
        mode: field(1, "mode")? as u32,
        uid: field(2, "uid")?,
        gid: field(3, "gid")?,
        nlink: field(4, "nlink")? as u32,
        mtime: field(5, "mtime")? as i64,
        filesize: field(6, "filesize")?,
        dev: DeviceNumber {
            major: field(7, "devmajor")? as u32,
            minor: field(8, "devminor")? as u32,
        },
        rdev: DeviceNumber {
            major: field(9, "rdevmajor")? as u32,
            minor: field(10, "rdevminor")? as u32,
        },
        namesize: field(11, "namesize")?,
    })
}

fn parse_odc(h: &[u8]) -> Result<Fields> {
    let split = |dev: u64| DeviceNumber {
        major: (dev >> 8) as u32,
        minor: (dev & 0xff) as u32,
    };
    Ok(Fields {
        dev: split(number(&h[6..12], 8, "dev")?),
        ino: number(&h[12..18], 8, "ino")?,
        mode: number(&h[18..24], 8, "mode")? as u32,
        uid: number(&h[24..30], 8, "uid")?,
        gid: number(&h[30..36], 8, "gid")?,
        nlink: number(&h[36..42], 8, "nlink")? as u32,
        rdev: split(number(&h[42..48], 8, "rdev")?),
        mtime: number(&h[48..59], 8, "mtime")? as i64,
        namesize: number(&h[59..65], 8, "namesize")?,
        filesize: number(&h[65..76], 8, "filesize")?,
    })
}

/// Streaming CPIO reader.
#[derive(Debug, Default)]
pub struct CpioFormat {
    body: Body,
}

impl CpioFormat {
    /// Create a new CPIO reader.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FormatReader for CpioFormat {
    fn name(&self) -> &str {
        "cpio"
    }

    fn bid(&mut self, stream: &mut dyn Upstream) -> Result<u32> {
        let head = stream.peek(6)?;
        Ok(if Variant::from_magic(head).is_some() { 48 } else { 0 })
    }

    fn read_header(&mut self, stream: &mut dyn Upstream, entry: &mut Entry) -> Result<Header> {
        self.body.finish(stream)?;

        let offset = stream.position();
        let magic = stream.peek(6)?;
        if magic.is_empty() {
            debug!("cpio: end of stream without trailer");
            return Ok(Header::End);
        }
        let variant = Variant::from_magic(magic).ok_or_else(|| {
            ArchiveError::invalid_header(format!("no cpio magic at offset {offset}"))
        })?;

        let header_len = variant.header_len();
        let fixed = stream.peek(header_len)?;
        if fixed.len() < header_len {
            return Err(ArchiveError::unexpected_eof((header_len - fixed.len()) as u64));
        }
        let fields = match variant {
            Variant::Newc | Variant::NewcCrc => parse_newc(&fixed[..header_len])?,
            Variant::Odc => parse_odc(&fixed[..header_len])?,
        };
        if fields.namesize == 0 || fields.namesize > MAX_NAME {
            return Err(ArchiveError::invalid_header(format!(
                "cpio name size {} at offset {offset}",
                fields.namesize
            )));
        }

        let align = variant.align();
        let name_end = header_len as u64 + fields.namesize;
        let mut total = name_end + Body::padding_for(name_end, align);

        let entry_type = EntryType::from_mode(fields.mode);
        let link_len = if entry_type == EntryType::Symlink {
            if fields.filesize > MAX_LINK {
                return Err(ArchiveError::invalid_header("cpio symlink target too long"));
            }
            fields.filesize + Body::padding_for(fields.filesize, align)
        } else {
            0
        };
        total += link_len;

        // Header, name and any link target are consumed together or not at all
        let record = stream.take_vec(total as usize)?;
        let name_bytes = &record[header_len..name_end as usize];
        let name_bytes = name_bytes.strip_suffix(&[0]).unwrap_or(name_bytes);
        let name = String::from_utf8_lossy(name_bytes).into_owned();
        trace!(
            "cpio: {:?} mode {:o} size {} at {}",
            name, fields.mode, fields.filesize, offset
        );

        if name == TRAILER {
            return Ok(Header::End);
        }

        entry.name = name;
        entry.set_mode(fields.mode);
        entry.attributes.uid = Some(fields.uid);
        entry.attributes.gid = Some(fields.gid);
        entry.ino = Some(fields.ino);
        entry.nlink = Some(fields.nlink);
        entry.dev = Some(fields.dev);
        if matches!(entry_type, EntryType::CharDevice | EntryType::BlockDevice) {
            entry.rdev = Some(fields.rdev);
        }
        entry.modified = unix_time(fields.mtime, 0);

        if entry_type == EntryType::Symlink {
            let start = total as usize - link_len as usize;
            let target = &record[start..start + fields.filesize as usize];
            entry.link_target = Some(String::from_utf8_lossy(target).into_owned().into());
            entry.size = Some(0);
            self.body = Body::default();
        } else {
            entry.size = Some(fields.filesize);
            self.body = Body::new(fields.filesize, Body::padding_for(fields.filesize, align));
        }
        Ok(Header::Entry)
    }

    fn read_data(&mut self, stream: &mut dyn Upstream, buf: &mut [u8]) -> Result<usize> {
        self.body.read(stream, buf)
    }

    fn skip_data(&mut self, stream: &mut dyn Upstream) -> Result<()> {
        self.body.finish(stream)
    }
}

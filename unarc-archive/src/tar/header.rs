//! TAR header block parsing.

use crate::time::{parse_decimal_time, unix_time};
use unarc_core::entry::{DeviceNumber, Entry, EntryType};
use unarc_core::error::{ArchiveError, Result};

/// TAR block size.
pub const BLOCK_SIZE: usize = 512;

/// PAX typeflag for extended header (applies to next file only).
pub const PAX_HEADER: u8 = b'x';
/// PAX typeflag for global extended header (applies to all subsequent files).
pub const PAX_GLOBAL_HEADER: u8 = b'g';
/// GNU LongName typeflag.
pub const GNU_LONGNAME: u8 = b'L';
/// GNU LongLink typeflag.
pub const GNU_LONGLINK: u8 = b'K';
/// GNU volume label typeflag.
pub const GNU_VOLHDR: u8 = b'V';
/// GNU sparse file typeflag.
pub const GNU_SPARSE: u8 = b'S';

/// Header layout variant, decided by the magic field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// Pre-POSIX header, no magic.
    V7,
    /// POSIX `ustar\0` + `00`.
    Ustar,
    /// GNU `ustar  \0`.
    Gnu,
}

/// Result of verifying a header checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    /// Matches the unsigned byte sum.
    Valid,
    /// Only matches when bytes are summed as signed values (old Sun tar).
    Signed,
    /// Matches neither.
    Invalid,
}

/// A parsed TAR header block.
#[derive(Debug, Clone)]
pub struct TarHeader {
    /// File name, with the ustar prefix already joined.
    pub name: String,
    /// Permission bits.
    pub mode: u32,
    /// Owner UID.
    pub uid: u64,
    /// Owner GID.
    pub gid: u64,
    /// Body size.
    pub size: u64,
    /// Modification time (seconds).
    pub mtime: i64,
    /// GNU access time (seconds).
    pub atime: Option<i64>,
    /// GNU change time (seconds).
    pub ctime: Option<i64>,
    /// Type flag.
    pub typeflag: u8,
    /// Link name.
    pub linkname: String,
    /// Header flavor.
    pub flavor: Flavor,
    /// Owner name.
    pub uname: String,
    /// Group name.
    pub gname: String,
    /// Device major number.
    pub devmajor: u32,
    /// Device minor number.
    pub devminor: u32,
}

impl TarHeader {
    /// Parse a non-zero header block.
    pub fn from_block(block: &[u8; BLOCK_SIZE]) -> Result<Self> {
        let flavor = flavor(block);

        let name = parse_string(&block[0..100]);
        let mode = parse_numeric(&block[100..108], "mode")? as u32;
        let uid = parse_numeric(&block[108..116], "uid")?;
        let gid = parse_numeric(&block[116..124], "gid")?;
        let size = parse_numeric(&block[124..136], "size")?;
        let mtime = parse_numeric(&block[136..148], "mtime")? as i64;
        let typeflag = block[156];
        let linkname = parse_string(&block[157..257]);

        let mut header = Self {
            name,
            mode: mode & 0o7777,
            uid,
            gid,
            size,
            mtime,
            atime: None,
            ctime: None,
            typeflag,
            linkname,
            flavor,
            uname: String::new(),
            gname: String::new(),
            devmajor: 0,
            devminor: 0,
        };

        if flavor != Flavor::V7 {
            header.uname = parse_string(&block[265..297]);
            header.gname = parse_string(&block[297..329]);
            header.devmajor = parse_numeric(&block[329..337], "devmajor")? as u32;
            header.devminor = parse_numeric(&block[337..345], "devminor")? as u32;
        }

        match flavor {
            Flavor::Ustar => {
                let prefix = parse_string(&block[345..500]);
                if !prefix.is_empty() {
                    header.name = format!("{}/{}", prefix, header.name);
                }
            }
            Flavor::Gnu => {
                let atime = parse_numeric(&block[345..357], "atime")?;
                let ctime = parse_numeric(&block[357..369], "ctime")?;
                header.atime = (atime != 0).then_some(atime as i64);
                header.ctime = (ctime != 0).then_some(ctime as i64);
            }
            Flavor::V7 => {}
        }

        Ok(header)
    }

    /// Get entry type.
    pub fn entry_type(&self) -> EntryType {
        match self.typeflag {
            b'0' | 0 | b'7' | GNU_SPARSE if self.name.ends_with('/') => EntryType::Directory,
            b'0' | 0 | b'7' | GNU_SPARSE => EntryType::File,
            b'1' => EntryType::Hardlink,
            b'2' => EntryType::Symlink,
            b'3' => EntryType::CharDevice,
            b'4' => EntryType::BlockDevice,
            b'5' => EntryType::Directory,
            b'6' => EntryType::Fifo,
            _ => EntryType::File,
        }
    }

    /// True for headers that describe the following header rather than a
    /// member of their own.
    pub fn is_metadata(&self) -> bool {
        matches!(
            self.typeflag,
            PAX_HEADER | PAX_GLOBAL_HEADER | GNU_LONGNAME | GNU_LONGLINK | GNU_VOLHDR
        )
    }

    /// Populate an entry from this header.
    pub fn fill_entry(&self, entry: &mut Entry) {
        entry.name = self.name.clone();
        entry.entry_type = self.entry_type();
        entry.attributes.unix_mode = Some(self.mode);
        entry.attributes.uid = Some(self.uid);
        entry.attributes.gid = Some(self.gid);
        if !self.uname.is_empty() {
            entry.attributes.uname = Some(self.uname.clone());
        }
        if !self.gname.is_empty() {
            entry.attributes.gname = Some(self.gname.clone());
        }
        entry.modified = unix_time(self.mtime, 0);
        entry.accessed = self.atime.and_then(|t| unix_time(t, 0));
        entry.changed = self.ctime.and_then(|t| unix_time(t, 0));

        match entry.entry_type {
            EntryType::Symlink => entry.link_target = Some(self.linkname.clone().into()),
            EntryType::Hardlink => entry.hardlink = Some(self.linkname.clone()),
            EntryType::CharDevice | EntryType::BlockDevice => {
                entry.rdev = Some(DeviceNumber {
                    major: self.devmajor,
                    minor: self.devminor,
                });
            }
            _ => {}
        }

        // Links and directories never carry a body worth reading
        entry.size = match entry.entry_type {
            EntryType::File => Some(self.size),
            _ => Some(0),
        };
    }
}

/// Whether every byte of the block is zero.
pub fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Classify the header magic.
pub fn flavor(block: &[u8; BLOCK_SIZE]) -> Flavor {
    match &block[257..265] {
        b"ustar  \0" => Flavor::Gnu,
        magic if &magic[..6] == b"ustar\0" => Flavor::Ustar,
        _ => Flavor::V7,
    }
}

/// Verify the checksum field against the block contents.
pub fn verify_checksum(block: &[u8; BLOCK_SIZE]) -> Checksum {
    let Ok(stored) = parse_numeric(&block[148..156], "checksum") else {
        return Checksum::Invalid;
    };

    let mut unsigned: u64 = 0;
    let mut signed: i64 = 0;
    for (i, &b) in block.iter().enumerate() {
        let b = if (148..156).contains(&i) { b' ' } else { b };
        unsigned += u64::from(b);
        signed += i64::from(b as i8);
    }

    if unsigned == stored {
        Checksum::Valid
    } else if signed >= 0 && signed as u64 == stored {
        Checksum::Signed
    } else {
        Checksum::Invalid
    }
}

/// Parse a NUL-terminated string.
pub fn parse_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Parse a numeric field: octal text, or GNU base-256 when the high bit of
/// the first byte is set.
pub fn parse_numeric(data: &[u8], field: &str) -> Result<u64> {
    if let Some((&first, rest)) = data.split_first() {
        if first & 0x80 != 0 {
            if first & 0x40 != 0 {
                return Err(ArchiveError::invalid_header(format!(
                    "negative base-256 {field}"
                )));
            }
            let mut value = u64::from(first & 0x3f);
            for &b in rest {
                value = value
                    .checked_mul(256)
                    .and_then(|v| v.checked_add(u64::from(b)))
                    .ok_or_else(|| {
                        ArchiveError::invalid_header(format!("{field} overflows 64 bits"))
                    })?;
            }
            return Ok(value);
        }
    }

    let s = parse_string(data);
    let s = s.trim_matches(|c: char| c == ' ' || c == '\0');
    if s.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(s, 8)
        .map_err(|_| ArchiveError::invalid_header(format!("invalid octal {field}: {s:?}")))
}

/// Parse pax extended header records (`"<len> <key>=<value>\n"` repeated),
/// keeping archive order.
pub fn parse_pax_data(data: &[u8]) -> Result<Vec<(String, String)>> {
    let mut records = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        if data[pos..].iter().all(|&b| b == 0) {
            break;
        }
        let space = data[pos..]
            .iter()
            .position(|&b| b == b' ')
            .map(|p| pos + p)
            .ok_or_else(|| ArchiveError::invalid_header("pax record without length"))?;
        let record_len: usize = std::str::from_utf8(&data[pos..space])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ArchiveError::invalid_header("pax record length is not a number"))?;

        let end = pos + record_len;
        if end <= space || end > data.len() || data[end - 1] != b'\n' {
            return Err(ArchiveError::invalid_header("malformed pax record"));
        }

        let record = &data[space + 1..end - 1];
        if let Some(eq) = record.iter().position(|&b| b == b'=') {
            let key = String::from_utf8_lossy(&record[..eq]).into_owned();
            let value = String::from_utf8_lossy(&record[eq + 1..]).into_owned();
            records.push((key, value));
        }
        pos = end;
    }

    Ok(records)
}

/// Apply pax records to an entry. Returns the body size override, if any.
///
/// Well-known keys replace header fields; everything else is kept in
/// [`Entry::extended`].
pub fn apply_pax(records: &[(String, String)], entry: &mut Entry) -> Option<u64> {
    let mut size = None;
    for (key, value) in records {
        match key.as_str() {
            "path" => entry.name = value.clone(),
            "linkpath" => match entry.entry_type {
                EntryType::Hardlink => entry.hardlink = Some(value.clone()),
                _ => entry.link_target = Some(value.into()),
            },
            "size" => {
                if let Ok(s) = value.parse::<u64>() {
                    size = Some(s);
                    if entry.entry_type == EntryType::File {
                        entry.size = Some(s);
                    }
                }
            }
            "mtime" => entry.modified = parse_decimal_time(value).or(entry.modified),
            "atime" => entry.accessed = parse_decimal_time(value).or(entry.accessed),
            "ctime" => entry.changed = parse_decimal_time(value).or(entry.changed),
            "uid" => entry.attributes.uid = value.parse().ok().or(entry.attributes.uid),
            "gid" => entry.attributes.gid = value.parse().ok().or(entry.attributes.gid),
            "uname" => entry.attributes.uname = Some(value.clone()),
            "gname" => entry.attributes.gname = Some(value.clone()),
            _ => entry.extended.push((key.clone(), value.clone())),
        }
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric(b"0000755\0", "mode").unwrap(), 0o755);
        assert_eq!(parse_numeric(b"   644 \0", "mode").unwrap(), 0o644);
        assert_eq!(parse_numeric(b"\0\0\0\0", "mode").unwrap(), 0);
        assert!(parse_numeric(b"12x\0", "size").is_err());

        let mut big = [0u8; 12];
        big[0] = 0x80;
        big[7] = 0x02;
        assert_eq!(parse_numeric(&big, "size").unwrap(), 2 << 32);
    }

    #[test]
    fn test_parse_string() {
        assert_eq!(parse_string(b"hello\0world"), "hello");
        assert_eq!(parse_string(b"full"), "full");
    }

    #[test]
    fn test_parse_pax_data() {
        let data = b"30 mtime=1700000000.123456789\n18 path=long/name\n";
        let records = parse_pax_data(data).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], ("path".to_string(), "long/name".to_string()));

        assert!(parse_pax_data(b"99 path=x\n").is_err());
    }

    #[test]
    fn test_apply_pax() {
        let mut entry = Entry::file("short", 3);
        let records = vec![
            ("path".to_string(), "a/very/long/name".to_string()),
            ("size".to_string(), "42".to_string()),
            ("SCHILY.xattr.user.k".to_string(), "v".to_string()),
        ];
        assert_eq!(apply_pax(&records, &mut entry), Some(42));
        assert_eq!(entry.name, "a/very/long/name");
        assert_eq!(entry.size, Some(42));
        assert_eq!(entry.extended("SCHILY.xattr.user.k"), Some("v"));
    }

    #[test]
    fn test_checksum_variants() {
        let mut block = [0u8; BLOCK_SIZE];
        block[..4].copy_from_slice(b"f\xe9le");
        let unsigned: u32 = block
            .iter()
            .enumerate()
            .map(|(i, &b)| if (148..156).contains(&i) { 32 } else { u32::from(b) })
            .sum();
        block[148..156].copy_from_slice(format!("{unsigned:06o}\0 ").as_bytes());
        assert_eq!(verify_checksum(&block), Checksum::Valid);

        // 0xe9 counts as -23 when summed signed
        let signed = unsigned - 256;
        block[148..156].copy_from_slice(format!("{signed:06o}\0 ").as_bytes());
        assert_eq!(verify_checksum(&block), Checksum::Signed);

        block[148..156].copy_from_slice(b"000001\0 ");
        assert_eq!(verify_checksum(&block), Checksum::Invalid);
    }
}

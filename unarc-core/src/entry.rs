//! Archive entry metadata.
//!
//! This module defines the `Entry` struct that represents one member of a
//! container, along with its metadata. The engine does not interpret these
//! attributes; formats fill them in and callers read them out.

use crate::io::ReaderId;
use std::path::PathBuf;
use std::time::SystemTime;

/// Unix file type mask.
pub const S_IFMT: u32 = 0o170000;

/// Entry type (file, directory, symlink, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryType {
    /// Regular file.
    #[default]
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Hard link to an earlier member.
    Hardlink,
    /// Character device.
    CharDevice,
    /// Block device.
    BlockDevice,
    /// Named pipe.
    Fifo,
    /// Unix domain socket.
    Socket,
    /// Unknown type.
    Unknown,
}

impl EntryType {
    /// Derive the type from the `S_IFMT` bits of a Unix mode.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            0o100000 => Self::File,
            0o040000 => Self::Directory,
            0o120000 => Self::Symlink,
            0o020000 => Self::CharDevice,
            0o060000 => Self::BlockDevice,
            0o010000 => Self::Fifo,
            0o140000 => Self::Socket,
            _ => Self::Unknown,
        }
    }

    /// The `S_IFMT` bits for this type, if it has any.
    pub fn mode_bits(&self) -> u32 {
        match self {
            Self::File | Self::Hardlink => 0o100000,
            Self::Directory => 0o040000,
            Self::Symlink => 0o120000,
            Self::CharDevice => 0o020000,
            Self::BlockDevice => 0o060000,
            Self::Fifo => 0o010000,
            Self::Socket => 0o140000,
            Self::Unknown => 0,
        }
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File)
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }

    /// Check if this is a symlink.
    pub fn is_symlink(&self) -> bool {
        matches!(self, Self::Symlink)
    }
}

/// Ownership and permission attributes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileAttributes {
    /// Permission bits (rwxrwxrwx plus setuid/setgid/sticky).
    pub unix_mode: Option<u32>,
    /// Windows/DOS attributes.
    pub dos_attributes: Option<u8>,
    /// User ID (Unix).
    pub uid: Option<u64>,
    /// Group ID (Unix).
    pub gid: Option<u64>,
    /// User name.
    pub uname: Option<String>,
    /// Group name.
    pub gname: Option<String>,
}

impl FileAttributes {
    /// Create new empty attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set Unix permission bits.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.unix_mode = Some(mode & 0o7777);
        self
    }

    /// Set DOS attributes.
    pub fn with_dos(mut self, attrs: u8) -> Self {
        self.dos_attributes = Some(attrs);
        self
    }

    /// Check if the entry is read-only.
    pub fn is_readonly(&self) -> bool {
        if let Some(dos) = self.dos_attributes {
            dos & 0x01 != 0
        } else if let Some(mode) = self.unix_mode {
            mode & 0o222 == 0
        } else {
            false
        }
    }
}

/// A device number split into major and minor parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNumber {
    /// Major number.
    pub major: u32,
    /// Minor number.
    pub minor: u32,
}

/// An entry in an archive.
///
/// The struct is format-agnostic. A reader populates it in place on every
/// `next_header` call; cloning is always safe, and [`Entry::clear`] resets it
/// for reuse. An entry remembers which reader it is bound to so it cannot be
/// fed to a different reader by mistake.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    /// The name/path of the entry within the archive.
    pub name: String,
    /// The type of entry.
    pub entry_type: EntryType,
    /// Body size in bytes, when the format records it up front.
    pub size: Option<u64>,
    /// Last modification time.
    pub modified: Option<SystemTime>,
    /// Last access time.
    pub accessed: Option<SystemTime>,
    /// Last status change time.
    pub changed: Option<SystemTime>,
    /// Creation time.
    pub created: Option<SystemTime>,
    /// Ownership and permissions.
    pub attributes: FileAttributes,
    /// Symlink target.
    pub link_target: Option<PathBuf>,
    /// Hard link target (an earlier member's name).
    pub hardlink: Option<String>,
    /// Device of the entry itself (as stored by cpio).
    pub dev: Option<DeviceNumber>,
    /// Device number for character and block devices.
    pub rdev: Option<DeviceNumber>,
    /// Inode number.
    pub ino: Option<u64>,
    /// Link count.
    pub nlink: Option<u32>,
    /// CRC-32 checksum of the body (if recorded).
    pub crc32: Option<u32>,
    /// Extended attributes and unrecognised pax records, in archive order.
    pub extended: Vec<(String, String)>,
    owner: Option<ReaderId>,
}

impl Entry {
    /// Create an empty, unbound entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty entry bound to a reader.
    pub fn bound_to(owner: ReaderId) -> Self {
        Self {
            owner: Some(owner),
            ..Self::default()
        }
    }

    /// Create a new file entry.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size: Some(size),
            ..Self::default()
        }
    }

    /// Create a new directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry_type: EntryType::Directory,
            size: Some(0),
            ..Self::default()
        }
    }

    /// The reader this entry is bound to.
    pub fn owner(&self) -> Option<ReaderId> {
        self.owner
    }

    /// Bind an unbound entry to a reader. Returns false if it already
    /// belongs to a different one.
    pub fn adopt(&mut self, reader: ReaderId) -> bool {
        match self.owner {
            Some(owner) => owner == reader,
            None => {
                self.owner = Some(reader);
                true
            }
        }
    }

    /// Reset all metadata. The reader binding is kept.
    pub fn clear(&mut self) {
        let owner = self.owner;
        *self = Self {
            owner,
            ..Self::default()
        };
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        self.entry_type.is_file()
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.entry_type.is_dir()
    }

    /// Full Unix mode: type bits plus permission bits.
    pub fn mode(&self) -> u32 {
        self.entry_type.mode_bits() | self.attributes.unix_mode.unwrap_or(0)
    }

    /// Set type and permissions from a full Unix mode.
    pub fn set_mode(&mut self, mode: u32) {
        self.entry_type = EntryType::from_mode(mode);
        self.attributes.unix_mode = Some(mode & 0o7777);
    }

    /// Look up an extended attribute by key.
    pub fn extended(&self, key: &str) -> Option<&str> {
        self.extended
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let type_char = match self.entry_type {
            EntryType::Directory => 'd',
            EntryType::Symlink => 'l',
            EntryType::Hardlink => 'h',
            EntryType::CharDevice => 'c',
            EntryType::BlockDevice => 'b',
            EntryType::Fifo => 'p',
            EntryType::Socket => 's',
            _ => '-',
        };
        match self.size {
            Some(size) => write!(f, "{}{:>10} {}", type_char, size, self.name),
            None => write!(f, "{}{:>10} {}", type_char, "?", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_file() {
        let entry = Entry::file("test.txt", 1000);
        assert!(entry.is_file());
        assert!(!entry.is_dir());
        assert_eq!(entry.size, Some(1000));
        assert_eq!(entry.to_string(), "-      1000 test.txt");
    }

    #[test]
    fn test_mode_round_trip() {
        let mut entry = Entry::new();
        entry.set_mode(0o040755);
        assert!(entry.is_dir());
        assert_eq!(entry.attributes.unix_mode, Some(0o755));
        assert_eq!(entry.mode(), 0o040755);

        entry.set_mode(0o120777);
        assert_eq!(entry.entry_type, EntryType::Symlink);
    }

    #[test]
    fn test_clear_keeps_binding() {
        let id = ReaderId::next();
        let mut entry = Entry::bound_to(id);
        entry.name = "a".into();
        entry.size = Some(3);
        entry.extended.push(("SCHILY.xattr.user.k".into(), "v".into()));

        let copy = entry.clone();
        entry.clear();

        assert!(entry.name.is_empty());
        assert_eq!(entry.size, None);
        assert!(entry.extended.is_empty());
        assert_eq!(entry.owner(), Some(id));
        assert_eq!(copy.name, "a");
        assert_eq!(copy.extended("SCHILY.xattr.user.k"), Some("v"));
    }

    #[test]
    fn test_adopt() {
        let a = ReaderId::next();
        let b = ReaderId::next();
        let mut entry = Entry::new();
        assert!(entry.adopt(a));
        assert!(entry.adopt(a));
        assert!(!entry.adopt(b));
        assert_eq!(entry.owner(), Some(a));
    }

    #[test]
    fn test_file_attributes() {
        let attrs = FileAttributes::new().with_mode(0o100444);
        assert!(attrs.is_readonly());
        assert_eq!(attrs.unix_mode, Some(0o444));

        let attrs = FileAttributes::new().with_mode(0o644).with_dos(0x00);
        assert!(!attrs.is_readonly());
    }
}

//! ZIP archive support.
//!
//! Two readers share the header parsing and body decoding in this module:
//!
//! - [`ZipStreamable`] walks local headers in order and works on any
//!   stream, including the output of a decompression filter.
//! - [`ZipSeekable`] loads the central directory first and needs a
//!   seekable source. It outbids the streaming reader when it applies.
//!
//! Stored and deflated members are decoded; anything else (encrypted
//! members, other methods) is listed but its data reads fail.

mod header;
mod member;
mod seekable;
mod streamable;

pub use header::{
    CentralDirectoryHeader, CompressionMethod, DataDescriptor, EndOfCentralDirectory,
    ExtraFields, LocalFileHeader,
};
pub use seekable::ZipSeekable;
pub use streamable::ZipStreamable;

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::Write;
    use unarc_core::{Entry, EntryType, Status};
    use unarc_core::stream::{SliceStream, Upstream};
    use unarc_core::traits::{FormatReader, Header};

    struct Member<'a> {
        name: &'a str,
        data: &'a [u8],
        deflate: bool,
        descriptor: bool,
        mode: u32,
        slack: usize,
    }

    impl<'a> Member<'a> {
        fn file(name: &'a str, data: &'a [u8]) -> Self {
            Self {
                name,
                data,
                deflate: false,
                descriptor: false,
                mode: 0o100644,
                slack: 0,
            }
        }

        fn deflated(mut self) -> Self {
            self.deflate = true;
            self
        }

        fn with_descriptor(mut self) -> Self {
            self.descriptor = true;
            self
        }

        /// Pad the compressed body with bytes the decoder never needs.
        fn with_slack(mut self, slack: usize) -> Self {
            self.slack = slack;
            self
        }

        fn with_mode(mut self, mode: u32) -> Self {
            self.mode = mode;
            self
        }
    }

    fn build_zip(members: &[Member<'_>]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();
        for m in members {
            let offset = out.len() as u32;
            let crc = crc32fast::hash(m.data);
            let mut body = if m.deflate {
                let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
                enc.write_all(m.data).unwrap();
                enc.finish().unwrap()
            } else {
                m.data.to_vec()
            };
            body.resize(body.len() + m.slack, 0);
            let method: u16 = if m.deflate { 8 } else { 0 };
            let flags: u16 = if m.descriptor { 0x0008 } else { 0 };
            let (local_crc, local_csize, local_usize) = if m.descriptor {
                (0, 0, 0)
            } else {
                (crc, body.len() as u32, m.data.len() as u32)
            };

            out.extend_from_slice(&0x04034B50u32.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&flags.to_le_bytes());
            out.extend_from_slice(&method.to_le_bytes());
            out.extend_from_slice(&0x6000u16.to_le_bytes());
            out.extend_from_slice(&0x5821u16.to_le_bytes());
            out.extend_from_slice(&local_crc.to_le_bytes());
            out.extend_from_slice(&local_csize.to_le_bytes());
            out.extend_from_slice(&local_usize.to_le_bytes());
            out.extend_from_slice(&(m.name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(m.name.as_bytes());
            out.extend_from_slice(&body);
            if m.descriptor {
                out.extend_from_slice(&0x08074B50u32.to_le_bytes());
                out.extend_from_slice(&crc.to_le_bytes());
                out.extend_from_slice(&(body.len() as u32).to_le_bytes());
                out.extend_from_slice(&(m.data.len() as u32).to_le_bytes());
            }

            central.extend_from_slice(&0x02014B50u32.to_le_bytes());
            central.extend_from_slice(&((3u16 << 8) | 20).to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&flags.to_le_bytes());
            central.extend_from_slice(&method.to_le_bytes());
            central.extend_from_slice(&0x6000u16.to_le_bytes());
            central.extend_from_slice(&0x5821u16.to_le_bytes());
            central.extend_from_slice(&crc.to_le_bytes());
            central.extend_from_slice(&(body.len() as u32).to_le_bytes());
            central.extend_from_slice(&(m.data.len() as u32).to_le_bytes());
            central.extend_from_slice(&(m.name.len() as u16).to_le_bytes());
            central.extend_from_slice(&[0u8; 8]);
            central.extend_from_slice(&(m.mode << 16).to_le_bytes());
            central.extend_from_slice(&offset.to_le_bytes());
            central.extend_from_slice(m.name.as_bytes());
        }

        let cd_offset = out.len() as u32;
        out.extend_from_slice(&central);
        out.extend_from_slice(&0x06054B50u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&(members.len() as u16).to_le_bytes());
        out.extend_from_slice(&(members.len() as u16).to_le_bytes());
        out.extend_from_slice(&(central.len() as u32).to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    fn read_all(reader: &mut dyn FormatReader, data: &[u8]) -> Vec<(Entry, Vec<u8>)> {
        let mut stream = SliceStream::new(data);
        let mut out = Vec::new();
        loop {
            let mut entry = Entry::new();
            match reader.read_header(&mut stream, &mut entry).unwrap() {
                Header::End => return out,
                Header::Warning(msg) => panic!("unexpected warning: {msg}"),
                Header::Entry => {}
            }
            let mut body = Vec::new();
            let mut buf = [0u8; 7];
            loop {
                let n = reader.read_data(&mut stream, &mut buf).unwrap();
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&buf[..n]);
            }
            out.push((entry, body));
        }
    }

    fn sample() -> Vec<u8> {
        build_zip(&[
            Member::file("hello.txt", b"Hello, World!"),
            Member::file("dir/", b"").with_mode(0o040755),
            Member::file("packed.txt", &[b'z'; 300]).deflated(),
        ])
    }

    #[test]
    fn test_streamable_reads_members_in_order() {
        let data = sample();
        let mut zip = ZipStreamable::new();
        assert_eq!(zip.bid(&mut SliceStream::new(&data)).unwrap(), 29);

        let entries = read_all(&mut zip, &data);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].0.name, "hello.txt");
        assert_eq!(entries[0].1, b"Hello, World!");
        assert_eq!(entries[1].0.entry_type, EntryType::Directory);
        assert_eq!(entries[2].0.size, Some(300));
        assert_eq!(entries[2].1, vec![b'z'; 300]);
    }

    #[test]
    fn test_seekable_uses_central_directory() {
        let data = build_zip(&[
            Member::file("run.sh", b"#!/bin/sh\n").with_mode(0o100755),
            Member::file("link", b"run.sh").with_mode(0o120777),
        ]);
        let mut zip = ZipSeekable::new();
        assert_eq!(zip.bid(&mut SliceStream::new(&data)).unwrap(), 32);

        let entries = read_all(&mut zip, &data);
        assert_eq!(entries.len(), 2);
        // 30-byte local header, "run.sh", then ten bytes of body
        assert_eq!(zip.header_offset(), Some(46));
        assert_eq!(entries[0].0.mode(), 0o100755);
        assert_eq!(entries[0].1, b"#!/bin/sh\n");
        assert_eq!(entries[1].0.entry_type, EntryType::Symlink);
        assert_eq!(
            entries[1].0.link_target.as_deref(),
            Some(std::path::Path::new("run.sh"))
        );
        assert_eq!(entries[1].0.size, Some(0));
        assert!(entries[1].1.is_empty());
    }

    #[test]
    fn test_seekable_declines_without_central_directory() {
        let mut data = sample();
        let cd = data.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
        data.truncate(cd);

        let mut stream = SliceStream::new(&data);
        assert_eq!(ZipSeekable::new().bid(&mut stream).unwrap(), 0);
        assert_eq!(stream.position(), 0);
        assert_eq!(ZipStreamable::new().bid(&mut stream).unwrap(), 29);
        assert_eq!(read_all(&mut ZipStreamable::new(), &data).len(), 3);
    }

    #[test]
    fn test_deflate_with_descriptor_streams() {
        let data = build_zip(&[
            Member::file("a.txt", b"first body, deflated").deflated().with_descriptor(),
            Member::file("b.txt", b"second"),
        ]);
        let entries = read_all(&mut ZipStreamable::new(), &data);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1, b"first body, deflated");
        assert_eq!(entries[1].1, b"second");

        let entries = read_all(&mut ZipSeekable::new(), &data);
        assert_eq!(entries[0].0.size, Some(20));
        assert_eq!(entries[0].1, b"first body, deflated");
    }

    #[test]
    fn test_stored_with_descriptor_needs_central_directory() {
        let data = build_zip(&[Member::file("s.bin", b"stored").with_descriptor()]);

        let mut entry = Entry::new();
        let err = ZipStreamable::new()
            .read_header(&mut SliceStream::new(&data), &mut entry)
            .unwrap_err();
        assert_eq!(err.status(), Status::Fatal);

        let entries = read_all(&mut ZipSeekable::new(), &data);
        assert_eq!(entries[0].1, b"stored");
    }

    #[test]
    fn test_unread_bodies_are_skipped() {
        let data = sample();
        let mut stream = SliceStream::new(&data).with_step(5);
        let mut zip = ZipStreamable::new();
        let mut names = Vec::new();
        loop {
            let mut entry = Entry::new();
            if zip.read_header(&mut stream, &mut entry).unwrap() == Header::End {
                break;
            }
            names.push(entry.name);
        }
        assert_eq!(names, ["hello.txt", "dir/", "packed.txt"]);
    }

    #[test]
    fn test_deflate_slack_keeps_next_header_aligned() {
        let data = build_zip(&[
            Member::file("padded.txt", &[b'p'; 200]).deflated().with_slack(7),
            Member::file("after.txt", b"after"),
        ]);

        let entries = read_all(&mut ZipStreamable::new(), &data);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1, vec![b'p'; 200]);
        assert_eq!(entries[1].0.name, "after.txt");
        assert_eq!(entries[1].1, b"after");

        let mut stream = SliceStream::new(&data).with_step(3);
        let mut zip = ZipStreamable::new();
        let mut entry = Entry::new();
        assert_eq!(zip.read_header(&mut stream, &mut entry).unwrap(), Header::Entry);
        let mut buf = [0u8; 16];
        assert_eq!(zip.read_data(&mut stream, &mut buf).unwrap(), 16);
        assert_eq!(zip.read_header(&mut stream, &mut entry).unwrap(), Header::Entry);
        assert_eq!(entry.name, "after.txt");
    }

    #[test]
    fn test_crc_mismatch_fails_entry() {
        let mut data = build_zip(&[Member::file("x", b"payload")]);
        // Flip a byte of the stored body
        let body_at = 30 + 1;
        data[body_at] ^= 0xff;

        let mut zip = ZipStreamable::new();
        let mut stream = SliceStream::new(&data);
        let mut entry = Entry::new();
        zip.read_header(&mut stream, &mut entry).unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(zip.read_data(&mut stream, &mut buf).unwrap(), 7);
        let err = zip.read_data(&mut stream, &mut buf).unwrap_err();
        assert_eq!(err.status(), Status::Failed);
    }

    #[test]
    fn test_empty_archive() {
        let data = build_zip(&[]);
        let mut zip = ZipSeekable::new();
        assert_eq!(zip.bid(&mut SliceStream::new(&data)).unwrap(), 32);
        assert!(read_all(&mut zip, &data).is_empty());
        assert_eq!(ZipStreamable::new().bid(&mut SliceStream::new(&data)).unwrap(), 0);
    }
}

//! Archive fixtures built in memory.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::{DeflateEncoder, GzEncoder};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use unarc::{ArchiveReader, Entry, Reader, Status};

/// One ustar header block.
pub fn tar_header(name: &str, size: usize, typeflag: u8) -> [u8; 512] {
    let mut block = [0u8; 512];
    block[..name.len()].copy_from_slice(name.as_bytes());
    block[100..108].copy_from_slice(b"0000644\0");
    block[108..116].copy_from_slice(b"0001750\0");
    block[116..124].copy_from_slice(b"0001750\0");
    block[124..136].copy_from_slice(format!("{size:011o}\0").as_bytes());
    block[136..148].copy_from_slice(b"14712345670\0");
    block[156] = typeflag;
    block[257..263].copy_from_slice(b"ustar\0");
    block[263..265].copy_from_slice(b"00");
    block[265..269].copy_from_slice(b"user");
    block[297..302].copy_from_slice(b"group");
    seal(&mut block, false);
    block
}

/// Write the header checksum, summing bytes as signed when asked to.
pub fn seal(block: &mut [u8; 512], signed: bool) {
    block[148..156].copy_from_slice(b"        ");
    let sum: i64 = block
        .iter()
        .map(|&b| if signed { i64::from(b as i8) } else { i64::from(b) })
        .sum();
    block[148..156].copy_from_slice(format!("{sum:06o}\0 ").as_bytes());
}

/// A tar archive of regular files, with the two-block end marker.
pub fn tar_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, data) in files {
        out.extend_from_slice(&tar_header(name, data.len(), b'0'));
        out.extend_from_slice(data);
        out.resize(out.len().div_ceil(512) * 512, 0);
    }
    out.resize(out.len() + 1024, 0);
    out
}

/// A zip archive with a central directory. Bodies longer than 64 bytes
/// are deflated.
pub fn zip_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();
    for (name, data) in files {
        let offset = out.len() as u32;
        let crc = crc32fast::hash(data);
        let (method, body) = if data.len() > 64 {
            let mut enc = DeflateEncoder::new(Vec::new(), Compression::best());
            enc.write_all(data).unwrap();
            (8u16, enc.finish().unwrap())
        } else {
            (0u16, data.to_vec())
        };

        let mut common = Vec::new();
        common.extend_from_slice(&20u16.to_le_bytes());
        common.extend_from_slice(&0u16.to_le_bytes());
        common.extend_from_slice(&method.to_le_bytes());
        common.extend_from_slice(&0x6000u16.to_le_bytes());
        common.extend_from_slice(&0x5821u16.to_le_bytes());
        common.extend_from_slice(&crc.to_le_bytes());
        common.extend_from_slice(&(body.len() as u32).to_le_bytes());
        common.extend_from_slice(&(data.len() as u32).to_le_bytes());
        common.extend_from_slice(&(name.len() as u16).to_le_bytes());
        common.extend_from_slice(&0u16.to_le_bytes());

        out.extend_from_slice(b"PK\x03\x04");
        out.extend_from_slice(&common);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&body);

        central.extend_from_slice(b"PK\x01\x02");
        central.extend_from_slice(&((3u16 << 8) | 20).to_le_bytes());
        central.extend_from_slice(&common);
        // comment length, disk, internal attributes
        central.extend_from_slice(&[0u8; 6]);
        central.extend_from_slice(&(0o100640u32 << 16).to_le_bytes());
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(name.as_bytes());
    }
    let cd_offset = out.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(b"PK\x05\x06");
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// gzip-compress `data`.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// A reader with every built-in filter and format enabled.
pub fn full_reader() -> Reader {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut reader = Reader::new();
    assert_eq!(reader.enable_all_filters(), Status::Ok);
    assert_eq!(reader.enable_all_formats(), Status::Ok);
    reader
}

/// Bind a read-only hook serving `data` in `chunk`-sized pieces. No skip,
/// no seek.
pub fn bind_streaming(reader: &mut Reader, data: Vec<u8>, chunk: usize) {
    let mut position = 0;
    let status = reader.set_read_hook(Box::new(move || {
        let end = data.len().min(position + chunk);
        let out = data[position..end].to_vec();
        position = end;
        (Status::Ok, out)
    }));
    assert_eq!(status, Status::Ok);
}

/// A counter shared between a hook and the test.
pub fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    (count, move || seen.load(Ordering::SeqCst))
}

/// Every entry's name and body, until END_OF_DATA.
pub fn collect(reader: &mut Reader) -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();
    let mut entry = reader.create_entry();
    loop {
        match reader.next_header(&mut entry) {
            Status::Ok => {}
            Status::Eof => return out,
            other => panic!("next_header returned {other}: {:?}", reader.last_error()),
        }
        let body = reader.read_data_to_vec().unwrap();
        out.push((entry.name.clone(), body));
    }
}

/// Names only, never touching the bodies.
pub fn names(reader: &mut Reader) -> Vec<String> {
    let mut out = Vec::new();
    let mut entry = Entry::new();
    while reader.next_header(&mut entry) == Status::Ok {
        out.push(entry.name.clone());
    }
    out
}

//! GZIP decompression filter (RFC 1952).
//!
//! Handles concatenated members: after each trailer the filter looks for
//! another member header and keeps going. Each member's CRC-32 and size are
//! verified against its trailer.
//!
//! ## Example
//!
//! ```rust
//! use unarc_archive::gzip::GzipBidder;
//! use unarc_core::stream::SliceStream;
//! use unarc_core::traits::FilterBidder;
//!
//! let mut bidder = GzipBidder;
//! let mut stream = SliceStream::new(&[0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0, 3]);
//! assert!(bidder.bid(&mut stream).unwrap() > 0);
//! ```

mod header;

pub use header::{GZIP_MAGIC, GzipHeader, GzipTrailer, flags};

use flate2::{Decompress, FlushDecompress};
use header::{FIXED_LEN, TRAILER_LEN};
use log::{debug, trace};
use unarc_core::error::{ArchiveError, Result};
use unarc_core::stream::Upstream;
use unarc_core::traits::{Filter, FilterBidder};

/// Detects gzip streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipBidder;

impl FilterBidder for GzipBidder {
    fn name(&self) -> &str {
        "gzip"
    }

    fn bid(&mut self, upstream: &mut dyn Upstream) -> Result<u32> {
        let head = upstream.peek(FIXED_LEN)?;
        // magic + method, plus the three reserved flag bits
        Ok(if GzipHeader::looks_like(head) { 27 } else { 0 })
    }

    fn init(&mut self, _upstream: &mut dyn Upstream) -> Result<Box<dyn Filter>> {
        Ok(Box::new(GzipFilter::new()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Body,
    Trailer,
    NextMember,
    Done,
}

/// Inflates gzip members from the layer below.
pub struct GzipFilter {
    state: State,
    inflater: Decompress,
    crc: crc32fast::Hasher,
    member_size: u64,
    members: u32,
}

impl GzipFilter {
    /// Create a filter positioned before the first member header.
    pub fn new() -> Self {
        Self {
            state: State::Header,
            inflater: Decompress::new(false),
            crc: crc32fast::Hasher::new(),
            member_size: 0,
            members: 0,
        }
    }

    /// Number of members started so far.
    pub fn members(&self) -> u32 {
        self.members
    }

    fn read_member_header(&mut self, upstream: &mut dyn Upstream) -> Result<()> {
        let mut want = FIXED_LEN;
        loop {
            let head = upstream.peek(want)?;
            if let Some((header, len)) = GzipHeader::parse(head)? {
                trace!(
                    "gzip: member {} header {:?} ({} bytes)",
                    self.members, header.filename, len
                );
                upstream.consume(len);
                break;
            }
            if head.len() < want {
                return Err(ArchiveError::unexpected_eof((want - head.len()) as u64));
            }
            want = head.len() * 2;
        }

        self.inflater.reset(false);
        self.crc = crc32fast::Hasher::new();
        self.member_size = 0;
        self.members += 1;
        self.state = State::Body;
        Ok(())
    }

    fn inflate(&mut self, upstream: &mut dyn Upstream, out: &mut [u8]) -> Result<usize> {
        let offset = upstream.position();
        let input = upstream.peek(1)?;
        if input.is_empty() {
            return Err(ArchiveError::unexpected_eof(TRAILER_LEN as u64));
        }

        let before_in = self.inflater.total_in();
        let before_out = self.inflater.total_out();
        let status = self
            .inflater
            .decompress(input, out, FlushDecompress::None)
            .map_err(|err| ArchiveError::corrupted(offset, format!("gzip: {err}")))?;
        let consumed = (self.inflater.total_in() - before_in) as usize;
        let produced = (self.inflater.total_out() - before_out) as usize;

        upstream.consume(consumed);
        self.crc.update(&out[..produced]);
        self.member_size += produced as u64;

        if status == flate2::Status::StreamEnd {
            self.state = State::Trailer;
        } else if consumed == 0 && produced == 0 {
            return Err(ArchiveError::corrupted(offset, "gzip: deflate stream stalled"));
        }
        Ok(produced)
    }

    fn check_trailer(&mut self, upstream: &mut dyn Upstream) -> Result<()> {
        let offset = upstream.position();
        let raw = upstream.take_vec(TRAILER_LEN)?;
        let mut bytes = [0u8; TRAILER_LEN];
        bytes.copy_from_slice(&raw);
        let trailer = GzipTrailer::parse(&bytes);

        let computed = self.crc.clone().finalize();
        if trailer.crc32 != computed {
            return Err(ArchiveError::corrupted(
                offset,
                format!(
                    "gzip CRC mismatch: expected {:#010x}, computed {computed:#010x}",
                    trailer.crc32
                ),
            ));
        }
        if trailer.isize != self.member_size as u32 {
            return Err(ArchiveError::corrupted(
                offset,
                format!(
                    "gzip size mismatch: expected {}, got {}",
                    trailer.isize, self.member_size
                ),
            ));
        }
        self.state = State::NextMember;
        Ok(())
    }
}

impl Default for GzipFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for GzipFilter {
    fn name(&self) -> &str {
        "gzip"
    }

    fn read(&mut self, upstream: &mut dyn Upstream, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            match self.state {
                State::Header => self.read_member_header(upstream)?,
                State::Body => {
                    let n = self.inflate(upstream, out)?;
                    if n > 0 {
                        return Ok(n);
                    }
                }
                State::Trailer => self.check_trailer(upstream)?,
                State::NextMember => {
                    let head = upstream.peek(2)?;
                    if head.starts_with(&GZIP_MAGIC) {
                        self.state = State::Header;
                    } else {
                        if !head.is_empty() {
                            debug!("gzip: ignoring trailing bytes after member {}", self.members);
                        }
                        self.state = State::Done;
                    }
                }
                State::Done => return Ok(0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use unarc_core::stream::SliceStream;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn decode(data: &[u8]) -> Result<Vec<u8>> {
        let mut filter = GzipFilter::new();
        let mut stream = SliceStream::new(data);
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = filter.read(&mut stream, &mut buf)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn test_bid() {
        let compressed = gzip(b"abc");
        let mut bidder = GzipBidder;
        assert_eq!(bidder.bid(&mut SliceStream::new(&compressed)).unwrap(), 27);
        assert_eq!(bidder.bid(&mut SliceStream::new(b"plain text")).unwrap(), 0);
    }

    #[test]
    fn test_decode_single_member() {
        let original = b"Hello, GZIP World! This is a test of decompression.".repeat(40);
        assert_eq!(decode(&gzip(&original)).unwrap(), original);
    }

    #[test]
    fn test_decode_concatenated_members() {
        let mut data = gzip(b"first ");
        data.extend_from_slice(&gzip(b"second"));
        assert_eq!(decode(&data).unwrap(), b"first second");
    }

    #[test]
    fn test_empty_member() {
        assert_eq!(decode(&gzip(b"")).unwrap(), b"");
    }

    #[test]
    fn test_crc_mismatch_is_fatal() {
        let mut data = gzip(b"checksummed");
        let crc_at = data.len() - 8;
        data[crc_at] ^= 0x01;
        let err = decode(&data).unwrap_err();
        assert_eq!(err.status(), unarc_core::Status::Fatal);
    }

    #[test]
    fn test_truncated_stream() {
        let data = gzip(b"truncated member body");
        let err = decode(&data[..data.len() - 4]).unwrap_err();
        assert!(matches!(err, ArchiveError::UnexpectedEof { .. }));
    }
}

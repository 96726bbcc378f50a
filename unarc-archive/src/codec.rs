//! Filters backed by stream decoders: bzip2, xz and Zstandard.
//!
//! Each codec is detected by its magic and decoded incrementally from the
//! layer below. Concatenated streams are decoded back to back, the way
//! `bzcat`, `xzcat` and `zstdcat` treat them.
//!
//! ```rust
//! use unarc_archive::codec::{CodecBidder, CodecKind};
//! use unarc_core::stream::SliceStream;
//! use unarc_core::traits::FilterBidder;
//!
//! let mut bidder = CodecBidder::new(CodecKind::Zstd);
//! assert_eq!(bidder.bid(&mut SliceStream::new(&[0x28, 0xb5, 0x2f, 0xfd])).unwrap(), 32);
//! ```

use log::{debug, trace};
use unarc_core::error::{ArchiveError, Result};
use unarc_core::stream::Upstream;
use unarc_core::traits::{Filter, FilterBidder};
use zstd::stream::raw::Operation;

const BZIP2_MAGIC: &[u8] = b"BZh";
const BZIP2_BLOCK_MAGIC: [u8; 6] = [0x31, 0x41, 0x59, 0x26, 0x53, 0x59];
const BZIP2_END_MAGIC: [u8; 6] = [0x17, 0x72, 0x45, 0x38, 0x50, 0x90];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

/// The stream codecs built in as filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    /// bzip2.
    Bzip2,
    /// xz (LZMA2 in the xz container).
    Xz,
    /// Zstandard frames.
    Zstd,
}

impl CodecKind {
    /// Capability name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
        }
    }

    /// Leading bytes of every stream.
    pub fn magic(&self) -> &'static [u8] {
        match self {
            Self::Bzip2 => BZIP2_MAGIC,
            Self::Xz => XZ_MAGIC,
            Self::Zstd => ZSTD_MAGIC,
        }
    }

    /// Bytes the bid needs to see.
    fn bid_len(&self) -> usize {
        match self {
            Self::Bzip2 => 10,
            _ => self.magic().len(),
        }
    }

    /// Bid on the head of a stream: the number of bits checked, or 0.
    fn bid(&self, head: &[u8]) -> u32 {
        if head.len() < self.bid_len() || !head.starts_with(self.magic()) {
            return 0;
        }
        match self {
            Self::Bzip2 => {
                // block size digit, then the first block or the end marker
                let block = &head[4..10];
                if !(b'1'..=b'9').contains(&head[3]) {
                    0
                } else if block == BZIP2_BLOCK_MAGIC || block == BZIP2_END_MAGIC {
                    24 + 5 + 48
                } else {
                    0
                }
            }
            Self::Xz => 48,
            Self::Zstd => 32,
        }
    }

    fn decoder(&self) -> Result<Box<dyn Decoder>> {
        Ok(match self {
            Self::Bzip2 => Box::new(Bzip2Decoder::new()),
            Self::Xz => Box::new(XzDecoder::new()?),
            Self::Zstd => Box::new(ZstdDecoder::new()?),
        })
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress of one decoding call.
struct Step {
    consumed: usize,
    produced: usize,
    ended: bool,
}

/// A stream decoder that can be restarted for the next stream.
trait Decoder: Send {
    fn step(&mut self, input: &[u8], out: &mut [u8]) -> std::result::Result<Step, String>;
    fn reset(&mut self) -> std::result::Result<(), String>;
}

struct Bzip2Decoder(bzip2::Decompress);

impl Bzip2Decoder {
    fn new() -> Self {
        Self(bzip2::Decompress::new(false))
    }
}

impl Decoder for Bzip2Decoder {
    fn step(&mut self, input: &[u8], out: &mut [u8]) -> std::result::Result<Step, String> {
        let (before_in, before_out) = (self.0.total_in(), self.0.total_out());
        let status = self.0.decompress(input, out).map_err(|err| err.to_string())?;
        Ok(Step {
            consumed: (self.0.total_in() - before_in) as usize,
            produced: (self.0.total_out() - before_out) as usize,
            ended: status == bzip2::Status::StreamEnd,
        })
    }

    fn reset(&mut self) -> std::result::Result<(), String> {
        self.0 = bzip2::Decompress::new(false);
        Ok(())
    }
}

struct XzDecoder(liblzma::stream::Stream);

impl XzDecoder {
    fn new() -> Result<Self> {
        Ok(Self(Self::stream()?))
    }

    fn stream() -> Result<liblzma::stream::Stream> {
        liblzma::stream::Stream::new_stream_decoder(u64::MAX, 0)
            .map_err(|err| ArchiveError::corrupted(0, format!("xz: {err}")))
    }
}

impl Decoder for XzDecoder {
    fn step(&mut self, input: &[u8], out: &mut [u8]) -> std::result::Result<Step, String> {
        let (before_in, before_out) = (self.0.total_in(), self.0.total_out());
        let status = self
            .0
            .process(input, out, liblzma::stream::Action::Run)
            .map_err(|err| err.to_string())?;
        Ok(Step {
            consumed: (self.0.total_in() - before_in) as usize,
            produced: (self.0.total_out() - before_out) as usize,
            ended: status == liblzma::stream::Status::StreamEnd,
        })
    }

    fn reset(&mut self) -> std::result::Result<(), String> {
        self.0 = Self::stream().map_err(|err| err.to_string())?;
        Ok(())
    }
}

struct ZstdDecoder(zstd::stream::raw::Decoder<'static>);

impl ZstdDecoder {
    fn new() -> Result<Self> {
        zstd::stream::raw::Decoder::new()
            .map(Self)
            .map_err(ArchiveError::from)
    }
}

impl Decoder for ZstdDecoder {
    fn step(&mut self, input: &[u8], out: &mut [u8]) -> std::result::Result<Step, String> {
        let status = self
            .0
            .run_on_buffers(input, out)
            .map_err(|err| err.to_string())?;
        Ok(Step {
            consumed: status.bytes_read,
            produced: status.bytes_written,
            // A zero hint means the frame is complete and flushed
            ended: status.remaining == 0,
        })
    }

    fn reset(&mut self) -> std::result::Result<(), String> {
        self.0.reinit().map_err(|err| err.to_string())
    }
}

/// Detects one codec by its magic.
#[derive(Debug, Clone, Copy)]
pub struct CodecBidder {
    kind: CodecKind,
}

impl CodecBidder {
    /// Bidder for `kind`.
    pub fn new(kind: CodecKind) -> Self {
        Self { kind }
    }
}

impl FilterBidder for CodecBidder {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn bid(&mut self, upstream: &mut dyn Upstream) -> Result<u32> {
        let head = upstream.peek(self.kind.bid_len())?;
        Ok(self.kind.bid(head))
    }

    fn init(&mut self, _upstream: &mut dyn Upstream) -> Result<Box<dyn Filter>> {
        Ok(Box::new(CodecFilter::new(self.kind)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stream,
    NextStream,
    Done,
}

/// Decodes one codec's streams from the layer below.
pub struct CodecFilter {
    kind: CodecKind,
    decoder: Box<dyn Decoder>,
    state: State,
    streams: u32,
}

impl CodecFilter {
    /// Create a filter positioned before the first stream.
    pub fn new(kind: CodecKind) -> Result<Self> {
        Ok(Self {
            kind,
            decoder: kind.decoder()?,
            state: State::Stream,
            streams: 1,
        })
    }

    /// Number of streams started so far.
    pub fn streams(&self) -> u32 {
        self.streams
    }

    fn decode(&mut self, upstream: &mut dyn Upstream, out: &mut [u8]) -> Result<usize> {
        let offset = upstream.position();
        let input = upstream.peek(1)?;
        if input.is_empty() {
            return Err(ArchiveError::unexpected_eof(1));
        }
        let step = self
            .decoder
            .step(input, out)
            .map_err(|err| ArchiveError::corrupted(offset, format!("{}: {err}", self.kind)))?;
        upstream.consume(step.consumed);

        if step.ended {
            trace!("{}: stream {} ends at {}", self.kind, self.streams, offset + step.consumed as u64);
            self.state = State::NextStream;
        } else if step.consumed == 0 && step.produced == 0 {
            return Err(ArchiveError::corrupted(
                offset,
                format!("{}: decoder stalled", self.kind),
            ));
        }
        Ok(step.produced)
    }
}

impl std::fmt::Debug for CodecFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecFilter")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("streams", &self.streams)
            .finish()
    }
}

impl Filter for CodecFilter {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn read(&mut self, upstream: &mut dyn Upstream, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            match self.state {
                State::Stream => {
                    let n = self.decode(upstream, out)?;
                    if n > 0 {
                        return Ok(n);
                    }
                }
                State::NextStream => {
                    let magic = self.kind.magic();
                    let head = upstream.peek(magic.len())?;
                    if head.starts_with(magic) {
                        self.decoder
                            .reset()
                            .map_err(|err| ArchiveError::corrupted(upstream.position(), err))?;
                        self.streams += 1;
                        self.state = State::Stream;
                    } else {
                        if !head.is_empty() {
                            debug!(
                                "{}: ignoring trailing bytes after stream {}",
                                self.kind, self.streams
                            );
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
    use std::io::Write;
    use unarc_core::stream::SliceStream;

    fn decode(kind: CodecKind, data: &[u8]) -> Result<Vec<u8>> {
        let mut stream = SliceStream::new(data);
        let mut filter = CodecBidder::new(kind).init(&mut stream)?;
        let mut out = Vec::new();
        let mut buf = [0u8; 333];
        loop {
            let n = filter.read(&mut stream, &mut buf)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    fn bzip2(data: &[u8]) -> Vec<u8> {
        let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn xz(data: &[u8]) -> Vec<u8> {
        let mut enc = liblzma::write::XzEncoder::new(Vec::new(), 6);
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn zstd(data: &[u8]) -> Vec<u8> {
        zstd::stream::encode_all(data, 3).unwrap()
    }

    fn payload() -> Vec<u8> {
        "one stream decoder per codec\n".repeat(400).into_bytes()
    }

    #[test]
    fn test_bids_match_own_magic_only() {
        let data = payload();
        let samples = [
            (CodecKind::Bzip2, bzip2(&data)),
            (CodecKind::Xz, xz(&data)),
            (CodecKind::Zstd, zstd(&data)),
        ];
        for (kind, compressed) in &samples {
            for (other, _) in &samples {
                let bid = CodecBidder::new(*other)
                    .bid(&mut SliceStream::new(compressed))
                    .unwrap();
                assert_eq!(bid > 0, kind == other, "{other} bidding on {kind}");
            }
        }
        let plain = CodecBidder::new(CodecKind::Bzip2).bid(&mut SliceStream::new(b"BZh9 not bzip2"));
        assert_eq!(plain.unwrap(), 0);
    }

    #[test]
    fn test_decodes_each_codec() {
        let data = payload();
        assert_eq!(decode(CodecKind::Bzip2, &bzip2(&data)).unwrap(), data);
        assert_eq!(decode(CodecKind::Xz, &xz(&data)).unwrap(), data);
        assert_eq!(decode(CodecKind::Zstd, &zstd(&data)).unwrap(), data);
    }

    #[test]
    fn test_concatenated_streams() {
        let mut data = bzip2(b"first ");
        data.extend_from_slice(&bzip2(b"second"));
        assert_eq!(decode(CodecKind::Bzip2, &data).unwrap(), b"first second");

        let mut data = xz(b"first ");
        data.extend_from_slice(&xz(b"second"));
        assert_eq!(decode(CodecKind::Xz, &data).unwrap(), b"first second");
    }

    #[test]
    fn test_truncated_stream() {
        let data = zstd(&payload());
        let err = decode(CodecKind::Zstd, &data[..data.len() / 2]).unwrap_err();
        assert!(matches!(err, ArchiveError::UnexpectedEof { .. }));
    }
}

//! Entry body cursors shared by the container formats.
//!
//! Most containers frame a body as "the next N bytes, then some padding".
//! [`Body`] tracks that. Bodies stored with DEFLATE go through [`Inflate`].
//! Both advance one step per call and update their counters before
//! returning, so an error in the middle leaves them ready to resume.

use flate2::{Decompress, FlushDecompress};
use unarc_core::error::{ArchiveError, Result};
use unarc_core::stream::Upstream;

/// A plain body of known length followed by padding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Body {
    remaining: u64,
    padding: u64,
}

impl Body {
    /// A body of `size` bytes followed by `padding` bytes of filler.
    pub fn new(size: u64, padding: u64) -> Self {
        Self {
            remaining: size,
            padding,
        }
    }

    /// Padding needed to bring `size` up to a multiple of `align`.
    pub fn padding_for(size: u64, align: u64) -> u64 {
        (align - size % align) % align
    }

    /// Bytes of body not yet delivered.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Read the next piece of the body.
    pub fn read(&mut self, stream: &mut dyn Upstream, buf: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = stream.read_into(&mut buf[..want])?;
        if n == 0 {
            return Err(ArchiveError::unexpected_eof(self.remaining));
        }
        self.remaining -= n as u64;
        Ok(n)
    }

    /// Skip the rest of the body and its padding.
    pub fn finish(&mut self, stream: &mut dyn Upstream) -> Result<()> {
        while self.remaining > 0 {
            let step = stream.skip(self.remaining)?;
            if step == 0 {
                return Err(ArchiveError::unexpected_eof(self.remaining));
            }
            self.remaining -= step;
        }
        while self.padding > 0 {
            let step = stream.skip(self.padding)?;
            if step == 0 {
                return Err(ArchiveError::unexpected_eof(self.padding));
            }
            self.padding -= step;
        }
        Ok(())
    }
}

/// A raw DEFLATE body, optionally bounded by a known compressed size.
pub struct Inflate {
    inflater: Decompress,
    crc: crc32fast::Hasher,
    input_left: Option<u64>,
    output: u64,
    done: bool,
}

impl Inflate {
    /// Start decoding. `compressed_size` bounds the input when known.
    pub fn new(compressed_size: Option<u64>) -> Self {
        Self {
            inflater: Decompress::new(false),
            crc: crc32fast::Hasher::new(),
            input_left: compressed_size,
            output: 0,
            done: false,
        }
    }

    /// True once the DEFLATE stream signalled its end.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decoded bytes produced so far.
    pub fn output_len(&self) -> u64 {
        self.output
    }

    /// CRC-32 of the decoded bytes so far.
    pub fn crc32(&self) -> u32 {
        self.crc.clone().finalize()
    }

    /// Decode the next piece. Returns 0 once the stream has ended.
    pub fn read(&mut self, stream: &mut dyn Upstream, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while !self.done {
            let offset = stream.position();
            let available = stream.peek(1)?;
            let limit = match self.input_left {
                Some(left) => available.len().min(usize::try_from(left).unwrap_or(usize::MAX)),
                None => available.len(),
            };
            let input = &available[..limit];

            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();
            let status = self
                .inflater
                .decompress(input, buf, FlushDecompress::None)
                .map_err(|err| ArchiveError::corrupted(offset, format!("deflate: {err}")))?;
            let consumed = (self.inflater.total_in() - before_in) as usize;
            let produced = (self.inflater.total_out() - before_out) as usize;
            let starved = input.is_empty();

            stream.consume(consumed);
            if let Some(left) = self.input_left.as_mut() {
                *left -= consumed as u64;
            }
            self.crc.update(&buf[..produced]);
            self.output += produced as u64;

            if status == flate2::Status::StreamEnd {
                self.done = true;
            }
            if produced > 0 {
                return Ok(produced);
            }
            if consumed == 0 && !self.done {
                if starved {
                    return Err(ArchiveError::unexpected_eof(1));
                }
                return Err(ArchiveError::corrupted(offset, "deflate stream stalled"));
            }
        }
        Ok(0)
    }

    /// Decode and discard until the end of the DEFLATE stream.
    pub fn finish(&mut self, stream: &mut dyn Upstream) -> Result<()> {
        let mut scratch = [0u8; 8192];
        while self.read(stream, &mut scratch)? > 0 {}
        Ok(())
    }

    /// Compressed bytes still expected (when the size was known).
    pub fn input_left(&self) -> Option<u64> {
        self.input_left
    }

    /// Skip compressed bytes declared past the end of the DEFLATE stream.
    pub fn skip_slack(&mut self, stream: &mut dyn Upstream) -> Result<()> {
        while let Some(left) = self.input_left.filter(|&left| left > 0) {
            let step = stream.skip(left)?;
            if step == 0 {
                return Err(ArchiveError::unexpected_eof(left));
            }
            self.input_left = Some(left - step);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Inflate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflate")
            .field("input_left", &self.input_left)
            .field("output", &self.output)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::Write;
    use unarc_core::stream::SliceStream;

    #[test]
    fn test_body_read_and_finish() {
        let data = b"hello world!\0\0\0\0next";
        let mut stream = SliceStream::new(data).with_step(3);
        let mut body = Body::new(12, Body::padding_for(12, 8));
        assert_eq!(body.padding, 4);

        let mut buf = [0u8; 5];
        assert_eq!(body.read(&mut stream, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(body.remaining(), 7);

        body.finish(&mut stream).unwrap();
        assert_eq!(stream.take_vec(4).unwrap(), b"next");
    }

    #[test]
    fn test_body_truncated() {
        let mut stream = SliceStream::new(b"abc");
        let mut body = Body::new(10, 0);
        let mut buf = [0u8; 16];
        assert_eq!(body.read(&mut stream, &mut buf).unwrap(), 3);
        let err = body.read(&mut stream, &mut buf).unwrap_err();
        assert!(matches!(err, ArchiveError::UnexpectedEof { expected: 7 }));
    }

    #[test]
    fn test_inflate_bounded() {
        let payload = "inflate me ".repeat(200);
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload.as_bytes()).unwrap();
        let mut compressed = encoder.finish().unwrap();
        let compressed_len = compressed.len() as u64;
        compressed.extend_from_slice(b"TAIL");

        let mut stream = SliceStream::new(&compressed);
        let mut inflate = Inflate::new(Some(compressed_len));
        let mut out = Vec::new();
        let mut buf = [0u8; 100];
        loop {
            let n = inflate.read(&mut stream, &mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }

        assert_eq!(out, payload.as_bytes());
        assert!(inflate.is_done());
        assert_eq!(inflate.crc32(), crc32fast::hash(payload.as_bytes()));
        assert_eq!(stream.take_vec(4).unwrap(), b"TAIL");
    }

    #[test]
    fn test_inflate_skips_declared_slack() {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"short").unwrap();
        let mut compressed = encoder.finish().unwrap();
        let declared = compressed.len() as u64 + 3;
        compressed.extend_from_slice(b"\0\0\0NEXT");

        let mut stream = SliceStream::new(&compressed).with_step(2);
        let mut inflate = Inflate::new(Some(declared));
        inflate.finish(&mut stream).unwrap();
        assert_eq!(inflate.input_left(), Some(3));
        inflate.skip_slack(&mut stream).unwrap();
        assert_eq!(inflate.input_left(), Some(0));
        assert_eq!(stream.take_vec(4).unwrap(), b"NEXT");
    }
}

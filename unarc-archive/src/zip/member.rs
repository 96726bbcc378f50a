//! Body decoding for one zip member, shared by both zip readers.

use super::header::{CompressionMethod, DataDescriptor};
use crate::body::{Body, Inflate};
use log::trace;
use unarc_core::error::{ArchiveError, Result};
use unarc_core::stream::Upstream;

enum Data {
    Stored(Body, crc32fast::Hasher),
    Deflate(Inflate),
    /// Known length, but we cannot decode it (encrypted or unknown method).
    Opaque(Body, String),
    /// Neither decodable nor of known length.
    Unbounded(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Body,
    Descriptor,
    Verify,
    Done,
}

/// The body of the current member.
pub struct Member {
    name: String,
    data: Data,
    phase: Phase,
    expected_crc: u32,
    descriptor: Option<bool>,
}

/// How a member's body is framed.
#[derive(Debug, Clone)]
pub struct MemberLayout<'a> {
    /// Member name, for messages.
    pub name: &'a str,
    /// Compression method.
    pub method: CompressionMethod,
    /// True when the body is encrypted.
    pub encrypted: bool,
    /// Compressed length, when known up front.
    pub compressed_size: Option<u64>,
    /// Expected CRC-32 (ignored when a descriptor follows).
    pub crc32: u32,
    /// `Some(zip64)` when a data descriptor follows the body.
    pub descriptor: Option<bool>,
}

impl Member {
    /// Prepare to read a body laid out as described.
    pub fn new(layout: MemberLayout<'_>) -> Self {
        let undecodable = if layout.encrypted {
            Some("encrypted zip entries are not supported".to_string())
        } else if let CompressionMethod::Unknown(_) = layout.method {
            Some(format!("{}", layout.method))
        } else {
            None
        };

        let data = match (undecodable, layout.method, layout.compressed_size) {
            (Some(reason), _, Some(size)) => Data::Opaque(Body::new(size, 0), reason),
            (Some(reason), _, None) => Data::Unbounded(reason),
            (None, CompressionMethod::Deflate, size) => Data::Deflate(Inflate::new(size)),
            (None, _, Some(size)) => Data::Stored(Body::new(size, 0), crc32fast::Hasher::new()),
            (None, _, None) => Data::Unbounded(
                "stored entry of unknown length cannot be streamed".to_string(),
            ),
        };

        Self {
            name: layout.name.to_string(),
            data,
            phase: Phase::Body,
            expected_crc: layout.crc32,
            descriptor: layout.descriptor,
        }
    }

    /// A member that has nothing left to deliver.
    pub fn finished() -> Self {
        Self {
            name: String::new(),
            data: Data::Stored(Body::default(), crc32fast::Hasher::new()),
            phase: Phase::Done,
            expected_crc: 0,
            descriptor: None,
        }
    }

    /// True when the body can be neither read nor skipped.
    pub fn is_unbounded(&self) -> bool {
        matches!(self.data, Data::Unbounded(_))
    }

    fn after_body(&self) -> Phase {
        if self.descriptor.is_some() {
            Phase::Descriptor
        } else {
            Phase::Verify
        }
    }

    fn read_descriptor(&mut self, stream: &mut dyn Upstream) -> Result<()> {
        let zip64 = self.descriptor.unwrap_or(false);
        let head = stream.peek(4)?;
        let signed = DataDescriptor::is_signed(head);
        let len = DataDescriptor::encoded_len(signed, zip64);
        let raw = stream.take_vec(len)?;
        let descriptor = DataDescriptor::parse(&raw, signed, zip64);
        trace!("zip: {} descriptor {:?}", self.name, descriptor);
        self.expected_crc = descriptor.crc32;
        Ok(())
    }

    /// Read the next piece of the body. CRC problems surface once, on the
    /// call that reaches the end of the body.
    pub fn read(&mut self, stream: &mut dyn Upstream, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.phase {
                Phase::Body => {
                    let n = match &mut self.data {
                        Data::Stored(body, crc) => {
                            let n = body.read(stream, buf)?;
                            crc.update(&buf[..n]);
                            n
                        }
                        Data::Deflate(inflate) => inflate.read(stream, buf)?,
                        Data::Opaque(_, reason) | Data::Unbounded(reason) => {
                            return Err(ArchiveError::unsupported_method(reason.clone()));
                        }
                    };
                    if n > 0 || buf.is_empty() {
                        return Ok(n);
                    }
                    if let Data::Deflate(inflate) = &mut self.data {
                        inflate.skip_slack(stream)?;
                    }
                    self.phase = self.after_body();
                }
                Phase::Descriptor => {
                    self.read_descriptor(stream)?;
                    self.phase = Phase::Verify;
                }
                Phase::Verify => {
                    self.phase = Phase::Done;
                    let computed = match &self.data {
                        Data::Stored(_, crc) => crc.clone().finalize(),
                        Data::Deflate(inflate) => inflate.crc32(),
                        _ => self.expected_crc,
                    };
                    if computed != self.expected_crc {
                        return Err(ArchiveError::crc_mismatch(self.expected_crc, computed));
                    }
                }
                Phase::Done => return Ok(0),
            }
        }
    }

    /// Skip whatever remains, including any data descriptor.
    pub fn skip(&mut self, stream: &mut dyn Upstream) -> Result<()> {
        loop {
            match self.phase {
                Phase::Body => {
                    match &mut self.data {
                        Data::Stored(body, _) | Data::Opaque(body, _) => body.finish(stream)?,
                        Data::Deflate(inflate) => match inflate.input_left() {
                            Some(left) if !inflate.is_done() => {
                                // Bounded: hop over the compressed bytes
                                self.data = Data::Opaque(Body::new(left, 0), String::new());
                                continue;
                            }
                            _ => {
                                inflate.finish(stream)?;
                                inflate.skip_slack(stream)?;
                            }
                        },
                        Data::Unbounded(reason) => {
                            return Err(ArchiveError::corrupted(
                                stream.position(),
                                format!("{}: cannot find the end of the body: {reason}", self.name),
                            ));
                        }
                    }
                    self.phase = self.after_body();
                }
                Phase::Descriptor => {
                    self.read_descriptor(stream)?;
                    self.phase = Phase::Done;
                }
                Phase::Verify | Phase::Done => {
                    self.phase = Phase::Done;
                    return Ok(());
                }
            }
        }
    }
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Member")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("expected_crc", &self.expected_crc)
            .finish()
    }
}

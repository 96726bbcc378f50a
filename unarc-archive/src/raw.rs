//! Pseudo-format that presents the whole decoded stream as one entry.
//!
//! Useful for single-file compressors (`foo.gz`, `foo.xz`) where there is
//! no container inside the filter. Never part of "all formats": it would
//! accept anything.

use log::debug;
use unarc_core::entry::{Entry, EntryType};
use unarc_core::error::Result;
use unarc_core::stream::Upstream;
use unarc_core::traits::{FormatReader, Header};

/// Name given to the single entry.
pub const RAW_ENTRY_NAME: &str = "data";

/// Single-entry passthrough reader.
#[derive(Debug, Default)]
pub struct RawFormat {
    delivered: bool,
}

impl RawFormat {
    /// Create a new raw reader.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FormatReader for RawFormat {
    fn name(&self) -> &str {
        "raw"
    }

    fn bid(&mut self, stream: &mut dyn Upstream) -> Result<u32> {
        Ok(if stream.at_eof()? { 0 } else { 1 })
    }

    fn read_header(&mut self, stream: &mut dyn Upstream, entry: &mut Entry) -> Result<Header> {
        if self.delivered {
            self.skip_data(stream)?;
            return Ok(Header::End);
        }
        entry.name = RAW_ENTRY_NAME.to_string();
        entry.entry_type = EntryType::File;
        entry.attributes.unix_mode = Some(0o644);
        entry.size = None;
        self.delivered = true;
        debug!("raw: presenting the stream as {RAW_ENTRY_NAME:?}");
        Ok(Header::Entry)
    }

    fn read_data(&mut self, stream: &mut dyn Upstream, buf: &mut [u8]) -> Result<usize> {
        stream.read_into(buf)
    }

    fn skip_data(&mut self, stream: &mut dyn Upstream) -> Result<()> {
        while stream.skip(u64::MAX)? > 0 {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unarc_core::stream::SliceStream;

    #[test]
    fn test_single_entry() {
        let data = b"just some bytes";
        let mut raw = RawFormat::new();
        assert_eq!(raw.bid(&mut SliceStream::new(data)).unwrap(), 1);

        let mut stream = SliceStream::new(data);
        let mut entry = Entry::new();
        assert_eq!(raw.read_header(&mut stream, &mut entry).unwrap(), Header::Entry);
        assert_eq!(entry.name, "data");
        assert!(entry.is_file());
        assert_eq!(entry.size, None);

        let mut buf = [0u8; 64];
        let n = raw.read_data(&mut stream, &mut buf).unwrap();
        assert_eq!(&buf[..n], data);
        assert_eq!(raw.read_header(&mut stream, &mut entry).unwrap(), Header::End);
    }

    #[test]
    fn test_declines_empty_stream() {
        assert_eq!(RawFormat::new().bid(&mut SliceStream::new(b"")).unwrap(), 0);
    }

    #[test]
    fn test_unread_data_is_drained() {
        let data = vec![7u8; 1000];
        let mut stream = SliceStream::new(&data).with_step(64);
        let mut raw = RawFormat::new();
        let mut entry = Entry::new();
        raw.read_header(&mut stream, &mut entry).unwrap();
        assert_eq!(raw.read_header(&mut stream, &mut entry).unwrap(), Header::End);
        assert_eq!(stream.position(), 1000);
    }
}

//! Pseudo-format for a stream with no bytes at all.
//!
//! An empty input is a valid, empty archive rather than an unrecognized
//! one.

use unarc_core::entry::Entry;
use unarc_core::error::Result;
use unarc_core::stream::Upstream;
use unarc_core::traits::{FormatReader, Header};

/// Reader for zero-length input.
#[derive(Debug, Default)]
pub struct EmptyFormat;

impl EmptyFormat {
    /// Create a new empty-stream reader.
    pub fn new() -> Self {
        Self
    }
}

impl FormatReader for EmptyFormat {
    fn name(&self) -> &str {
        "empty"
    }

    fn bid(&mut self, stream: &mut dyn Upstream) -> Result<u32> {
        Ok(if stream.at_eof()? { 1 } else { 0 })
    }

    fn read_header(&mut self, _stream: &mut dyn Upstream, _entry: &mut Entry) -> Result<Header> {
        Ok(Header::End)
    }

    fn read_data(&mut self, _stream: &mut dyn Upstream, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn skip_data(&mut self, _stream: &mut dyn Upstream) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unarc_core::stream::SliceStream;

    #[test]
    fn test_bids_only_on_empty_input() {
        let mut format = EmptyFormat::new();
        assert_eq!(format.bid(&mut SliceStream::new(b"")).unwrap(), 1);
        assert_eq!(format.bid(&mut SliceStream::new(b"x")).unwrap(), 0);

        let mut entry = Entry::new();
        let header = format.read_header(&mut SliceStream::new(b""), &mut entry);
        assert_eq!(header.unwrap(), Header::End);
    }
}

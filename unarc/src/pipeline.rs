//! The decode pipeline: source, stacked filters and the selected format.
//!
//! ```text
//!   format  ── reads entries from ──▶  top filter level
//!                                       ...
//!                                      outermost filter level
//!                                       │
//!                                      source (hooks)
//! ```
//!
//! Every level keeps a [`PeekBuf`] of decoded bytes, so bidders at any
//! height can look ahead without consuming. Detection is resumable: when
//! a bid or an init fails with RETRY, calling [`Pipeline::detect`] again
//! picks up where it stopped.

use crate::source::Source;
use log::{debug, trace};
use unarc_core::Status;
use unarc_core::entry::Entry;
use unarc_core::error::{ArchiveError, Result};
use unarc_core::io::Whence;
use unarc_core::stream::{PeekBuf, REFILL_SIZE, Upstream};
use unarc_core::traits::{Filter, FilterBidder, FormatReader, Header};

/// One stacked filter and its decoded-but-unconsumed output.
struct Level {
    filter: Box<dyn Filter>,
    buf: PeekBuf,
    position: u64,
}

impl Level {
    fn fill(&mut self, below: &mut dyn Upstream, min: usize) -> Result<()> {
        while self.buf.len() < min && !self.buf.is_eof() {
            let want = (min - self.buf.len()).max(REFILL_SIZE);
            let filter = &mut self.filter;
            let n = self.buf.fill_with(want, |out| filter.read(below, out))?;
            if n == 0 {
                self.buf.mark_eof();
            }
        }
        Ok(())
    }
}

/// The stream as seen from the top of `levels`.
struct View<'a> {
    source: &'a mut Source,
    levels: &'a mut [Level],
}

impl Upstream for View<'_> {
    fn peek(&mut self, min: usize) -> Result<&[u8]> {
        match self.levels.split_last_mut() {
            None => self.source.peek(min),
            Some((top, rest)) => {
                let mut below = View {
                    source: &mut *self.source,
                    levels: rest,
                };
                top.fill(&mut below, min.max(1))?;
                Ok(top.buf.available())
            }
        }
    }

    fn consume(&mut self, n: usize) {
        match self.levels.last_mut() {
            None => self.source.consume(n),
            Some(top) => {
                top.buf.consume(n);
                top.position += n as u64;
            }
        }
    }

    fn skip(&mut self, n: u64) -> Result<u64> {
        if self.levels.is_empty() {
            return self.source.skip(n);
        }
        let available = self.peek(1)?.len() as u64;
        let step = n.min(available);
        self.consume(step as usize);
        Ok(step)
    }

    fn position(&self) -> u64 {
        self.levels
            .last()
            .map_or_else(|| self.source.position(), |top| top.position)
    }

    fn seekable(&self) -> bool {
        self.levels.is_empty() && self.source.seekable()
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        if !self.levels.is_empty() {
            return Err(ArchiveError::NotSeekable);
        }
        self.source.seek(offset, whence)
    }
}

/// Candidates still being negotiated.
struct Detection {
    filters: Vec<Box<dyn FilterBidder>>,
    formats: Vec<Box<dyn FormatReader>>,
    /// A filter that won its bid but whose init has not completed.
    pending: Option<usize>,
    filters_done: bool,
}

/// Source, filter stack and format for one open reader.
pub(crate) struct Pipeline {
    source: Source,
    levels: Vec<Level>,
    max_depth: usize,
    detection: Detection,
    format: Option<Box<dyn FormatReader>>,
    in_body: bool,
    header_position: u64,
}

impl Pipeline {
    pub(crate) fn new(
        source: Source,
        filters: Vec<Box<dyn FilterBidder>>,
        formats: Vec<Box<dyn FormatReader>>,
        max_depth: usize,
    ) -> Self {
        Self {
            source,
            levels: Vec::new(),
            max_depth,
            detection: Detection {
                filters,
                formats,
                pending: None,
                filters_done: false,
            },
            format: None,
            in_body: false,
            header_position: 0,
        }
    }

    pub(crate) fn open_source(&mut self) -> Result<Status> {
        self.source.open()
    }

    pub(crate) fn close_source(&mut self) -> Result<Status> {
        self.source.close()
    }

    /// True once a format has been selected.
    pub(crate) fn is_ready(&self) -> bool {
        self.format.is_some()
    }

    /// Stack filters until none bids, then select the format.
    pub(crate) fn detect(&mut self) -> Result<()> {
        while !self.detection.filters_done {
            self.stack_next_filter()?;
        }
        if self.format.is_none() {
            self.select_format()?;
        }
        Ok(())
    }

    fn stack_next_filter(&mut self) -> Result<()> {
        let winner = match self.detection.pending {
            Some(index) => index,
            None => {
                let mut view = View {
                    source: &mut self.source,
                    levels: &mut self.levels,
                };
                let mut best: Option<(usize, u32)> = None;
                for (index, bidder) in self.detection.filters.iter_mut().enumerate() {
                    let bid = bidder.bid(&mut view)?;
                    trace!("filter {} bids {bid}", bidder.name());
                    if bid > 0 && best.is_none_or(|(_, top)| bid > top) {
                        best = Some((index, bid));
                    }
                }
                let Some((index, bid)) = best else {
                    self.detection.filters_done = true;
                    return Ok(());
                };
                if self.levels.len() >= self.max_depth {
                    return Err(ArchiveError::FilterDepth {
                        limit: self.max_depth,
                    });
                }
                debug!(
                    "filter {} wins with {bid} at depth {}",
                    self.detection.filters[index].name(),
                    self.levels.len()
                );
                self.detection.pending = Some(index);
                index
            }
        };

        let mut view = View {
            source: &mut self.source,
            levels: &mut self.levels,
        };
        let filter = self.detection.filters[winner].init(&mut view)?;
        self.detection.pending = None;
        self.levels.push(Level {
            filter,
            buf: PeekBuf::new(),
            position: 0,
        });
        Ok(())
    }

    fn select_format(&mut self) -> Result<()> {
        let mut view = View {
            source: &mut self.source,
            levels: &mut self.levels,
        };
        let seekable = view.seekable();
        let mut best: Option<(usize, u32)> = None;
        for (index, format) in self.detection.formats.iter_mut().enumerate() {
            if format.requires_seek() && !seekable {
                trace!("format {} skipped: stream is not seekable", format.name());
                continue;
            }
            let bid = format.bid(&mut view)?;
            trace!("format {} bids {bid}", format.name());
            if bid > 0 && best.is_none_or(|(_, top)| bid > top) {
                best = Some((index, bid));
            }
        }
        let (index, bid) = best.ok_or(ArchiveError::UnrecognizedFormat)?;
        let format = self.detection.formats.swap_remove(index);
        debug!("format {} wins with {bid}", format.name());
        self.detection.formats.clear();
        self.format = Some(format);
        Ok(())
    }

    fn format(&mut self) -> Result<(&mut dyn FormatReader, View<'_>)> {
        let format = self
            .format
            .as_deref_mut()
            .ok_or_else(|| ArchiveError::invalid_state("read", "detecting"))?;
        let view = View {
            source: &mut self.source,
            levels: &mut self.levels,
        };
        Ok((format, view))
    }

    /// Skip any unread body, then read the next header.
    pub(crate) fn next_header(&mut self, entry: &mut Entry) -> Result<Header> {
        if self.in_body {
            self.skip_data()?;
        }
        let (format, mut view) = self.format()?;
        let position = view.position();
        let header = format.read_header(&mut view, entry)?;
        let position = format.header_offset().unwrap_or(position);
        self.header_position = position;
        self.in_body = header != Header::End;
        Ok(header)
    }

    pub(crate) fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.in_body {
            return Ok(0);
        }
        let (format, mut view) = self.format()?;
        format.read_data(&mut view, buf)
    }

    pub(crate) fn skip_data(&mut self) -> Result<()> {
        if !self.in_body {
            return Ok(());
        }
        let (format, mut view) = self.format()?;
        format.skip_data(&mut view)?;
        self.in_body = false;
        Ok(())
    }

    /// Filter names, outermost first.
    pub(crate) fn filter_names(&self) -> Vec<&str> {
        self.levels.iter().map(|level| level.filter.name()).collect()
    }

    pub(crate) fn format_name(&self) -> Option<&str> {
        self.format.as_deref().map(|format| format.name())
    }

    /// Offset, in the decoded stream, where the last header started.
    pub(crate) fn header_position(&self) -> u64 {
        self.header_position
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("source", &self.source)
            .field("filters", &self.filter_names())
            .field("format", &self.format_name())
            .field("in_body", &self.in_body)
            .finish()
    }
}

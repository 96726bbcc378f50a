//! The capability registry: which filters and formats a reader may use.
//!
//! Registration is additive and idempotent. Candidates keep their
//! registration order, which is also the tie-break order during
//! detection.

use log::{debug, trace};
use unarc_archive::ProgramBidder;
use unarc_archive::detect::{all_filters, all_formats, filter_by_name, formats_by_name};
use unarc_core::error::Result;
use unarc_core::traits::{FilterBidder, FormatReader};

/// Enabled filters and formats for one reader.
#[derive(Default)]
pub struct Registry {
    filters: Vec<Box<dyn FilterBidder>>,
    formats: Vec<Box<dyn FormatReader>>,
    programs: Vec<(String, Option<Vec<u8>>)>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter bidder unless one with the same name is present.
    pub fn register_filter(&mut self, bidder: Box<dyn FilterBidder>) {
        if self.filters.iter().any(|f| f.name() == bidder.name()) {
            trace!("filter {} already enabled", bidder.name());
            return;
        }
        debug!("enabling filter {}", bidder.name());
        self.filters.push(bidder);
    }

    /// Add a format reader unless one with the same name is present.
    pub fn register_format(&mut self, format: Box<dyn FormatReader>) {
        if self.formats.iter().any(|f| f.name() == format.name()) {
            trace!("format {} already enabled", format.name());
            return;
        }
        debug!("enabling format {}", format.name());
        self.formats.push(format);
    }

    /// Enable a built-in filter by name.
    pub fn enable_filter(&mut self, name: &str) -> Result<()> {
        let bidder = filter_by_name(name)?;
        self.register_filter(bidder);
        Ok(())
    }

    /// Enable every built-in filter.
    pub fn enable_all_filters(&mut self) {
        for bidder in all_filters() {
            self.register_filter(bidder);
        }
    }

    /// Enable a built-in format by name. Aliases may enable several readers.
    pub fn enable_format(&mut self, name: &str) -> Result<()> {
        for format in formats_by_name(name)? {
            self.register_format(format);
        }
        Ok(())
    }

    /// Enable every built-in format.
    pub fn enable_all_formats(&mut self) {
        for format in all_formats() {
            self.register_format(format);
        }
    }

    /// Enable an external program, optionally gated on a leading
    /// signature. The same command and signature is only added once.
    pub fn enable_program(&mut self, command: &str, signature: Option<&[u8]>) -> Result<()> {
        let bidder = match signature {
            Some(signature) => ProgramBidder::with_signature(command, signature)?,
            None => ProgramBidder::new(command),
        };
        let key = (command.to_string(), signature.map(<[u8]>::to_vec));
        if self.programs.contains(&key) {
            trace!("program `{command}` already enabled");
            return Ok(());
        }
        debug!("enabling program `{command}`");
        self.programs.push(key);
        self.filters.push(Box::new(bidder));
        Ok(())
    }

    /// Names of the enabled filters, in registration order.
    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Names of the enabled formats, in registration order.
    pub fn format_names(&self) -> Vec<&str> {
        self.formats.iter().map(|f| f.name()).collect()
    }

    /// Hand the candidates over to a pipeline, leaving the registry empty.
    pub(crate) fn take(&mut self) -> (Vec<Box<dyn FilterBidder>>, Vec<Box<dyn FormatReader>>) {
        self.programs.clear();
        (
            std::mem::take(&mut self.filters),
            std::mem::take(&mut self.formats),
        )
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("filters", &self.filter_names())
            .field("formats", &self.format_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unarc_core::Status;

    #[test]
    fn test_idempotent_registration() {
        let mut registry = Registry::new();
        registry.enable_format("tar").unwrap();
        registry.enable_format("gnutar").unwrap();
        registry.enable_all_formats();
        assert_eq!(
            registry.format_names(),
            ["tar", "ar", "cpio", "empty", "zip_seekable", "zip_streamable"]
        );

        registry.enable_filter("gzip").unwrap();
        registry.enable_all_filters();
        assert_eq!(registry.filter_names(), ["gzip", "bzip2", "xz", "zstd"]);
    }

    #[test]
    fn test_unsupported_names() {
        let mut registry = Registry::new();
        assert_eq!(registry.enable_filter("lzip").unwrap_err().status(), Status::Failed);
        assert_eq!(registry.enable_format("7zip").unwrap_err().status(), Status::Failed);
        assert_eq!(registry.enable_format("bogus").unwrap_err().status(), Status::Failed);
        assert!(registry.format_names().is_empty());
    }

    #[test]
    fn test_program_deduplication() {
        let mut registry = Registry::new();
        registry.enable_program("cat", None).unwrap();
        registry.enable_program("cat", None).unwrap();
        registry.enable_program("cat", Some(b"MAGIC")).unwrap();
        registry.enable_program("cat", Some(b"MAGIC")).unwrap();
        registry.enable_program("gunzip", None).unwrap();
        assert_eq!(registry.filter_names(), ["program", "program", "program"]);

        let err = registry.enable_program("cat", Some(b"")).unwrap_err();
        assert_eq!(err.status(), Status::Failed);
    }
}

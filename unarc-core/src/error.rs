//! Error types for unarc operations.
//!
//! Every error condition carries the [`Status`] it surfaces as, so layers
//! can propagate with `?` while the reader still reports the right outcome
//! code at its public surface.

use crate::io::ReaderId;
use crate::status::Status;
use std::io;
use thiserror::Error;

/// The main error type for unarc operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// I/O error from a file, pipe or spawned program.
    #[error("I/O error: {0}")]
    Io(io::Error),

    /// A bound I/O hook reported a non-OK status.
    #[error("{op} hook returned {status}")]
    Hook {
        /// The hook that was invoked.
        op: &'static str,
        /// The status it returned.
        status: Status,
    },

    /// A hook the operation depends on was never bound.
    #[error("{op} hook is not bound")]
    MissingHook {
        /// The missing hook.
        op: &'static str,
    },

    /// A hook returned a value outside its contract.
    #[error("{op} hook returned invalid value {value}")]
    InvalidHookResult {
        /// The hook that was invoked.
        op: &'static str,
        /// The offending return value.
        value: i64,
    },

    /// A hook was invoked on behalf of a reader that did not register it.
    #[error("hook registered by reader {owner} invoked by reader {caller}")]
    ForeignHandle {
        /// Reader the hook belongs to.
        owner: ReaderId,
        /// Reader that tried to use it.
        caller: ReaderId,
    },

    /// An entry created by one reader was handed to another.
    #[error("entry belongs to reader {owner}, not reader {reader}")]
    ForeignEntry {
        /// Reader the entry belongs to.
        owner: ReaderId,
        /// Reader it was passed to.
        reader: ReaderId,
    },

    /// The operation is not allowed in the reader's current state.
    #[error("cannot {op} while reader is {state}")]
    InvalidState {
        /// The attempted operation.
        op: &'static str,
        /// The state the reader was in.
        state: &'static str,
    },

    /// A filter or format name this build does not provide.
    #[error("{kind} '{name}' is not supported by this build")]
    Unsupported {
        /// "filter" or "format".
        kind: &'static str,
        /// The requested name.
        name: String,
    },

    /// No enabled format recognised the stream.
    #[error("Unrecognized archive format")]
    UnrecognizedFormat,

    /// Filter auto-detection stacked more layers than allowed.
    #[error("Too many filters stacked: limit is {limit}")]
    FilterDepth {
        /// The configured limit.
        limit: usize,
    },

    /// Invalid header format.
    #[error("Invalid header: {message}")]
    InvalidHeader {
        /// Description of the header error.
        message: String,
    },

    /// Unexpected end of data.
    #[error("Unexpected end of file: expected {expected} more bytes")]
    UnexpectedEof {
        /// Number of bytes that were expected but not available.
        expected: u64,
    },

    /// Corrupted data in the stream.
    #[error("Corrupted data at offset {offset}: {message}")]
    CorruptedData {
        /// Byte offset where corruption was detected.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// CRC checksum mismatch on an entry body.
    #[error("CRC mismatch: expected {expected:#x}, computed {computed:#x}")]
    CrcMismatch {
        /// Expected CRC value from the archive.
        expected: u32,
        /// Computed CRC value from data.
        computed: u32,
    },

    /// Unsupported compression method or entry feature.
    #[error("Unsupported compression method: {method}")]
    UnsupportedMethod {
        /// The compression method identifier.
        method: String,
    },

    /// Random access was requested from a stream that cannot seek.
    #[error("Stream is not seekable")]
    NotSeekable,

    /// An external filter program failed.
    #[error("Filter program `{command}` failed: {message}")]
    Program {
        /// The command line.
        command: String,
        /// What went wrong.
        message: String,
    },

    /// A recoverable anomaly reported alongside a successful result.
    #[error("{message}")]
    Anomaly {
        /// Description of the anomaly.
        message: String,
    },
}

/// Result type alias for unarc operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    /// The status this error surfaces as.
    pub fn status(&self) -> Status {
        match self {
            Self::Hook { status, .. } => *status,
            Self::Unsupported { .. } | Self::CrcMismatch { .. } | Self::UnsupportedMethod { .. } => {
                Status::Failed
            }
            Self::Anomaly { .. } => Status::Warn,
            Self::Io(_)
            | Self::MissingHook { .. }
            | Self::InvalidHookResult { .. }
            | Self::ForeignHandle { .. }
            | Self::ForeignEntry { .. }
            | Self::InvalidState { .. }
            | Self::UnrecognizedFormat
            | Self::FilterDepth { .. }
            | Self::InvalidHeader { .. }
            | Self::UnexpectedEof { .. }
            | Self::CorruptedData { .. }
            | Self::NotSeekable
            | Self::Program { .. } => Status::Fatal,
        }
    }

    /// True when retrying the identical call may succeed.
    pub fn is_retry(&self) -> bool {
        self.status() == Status::Retry
    }

    /// Wrap this error so it can cross an [`std::io::Read`] boundary.
    ///
    /// The conversion back through `From<io::Error>` recovers it unchanged.
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Io(err) => err,
            other => io::Error::other(other),
        }
    }

    /// Create a hook status error.
    pub fn hook(op: &'static str, status: Status) -> Self {
        Self::Hook { op, status }
    }

    /// Create an invalid state error.
    pub fn invalid_state(op: &'static str, state: &'static str) -> Self {
        Self::InvalidState { op, state }
    }

    /// Create an unsupported capability error.
    pub fn unsupported(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Unsupported {
            kind,
            name: name.into(),
        }
    }

    /// Create an invalid header error.
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            message: message.into(),
        }
    }

    /// Create an unexpected EOF error.
    pub fn unexpected_eof(expected: u64) -> Self {
        Self::UnexpectedEof { expected }
    }

    /// Create a corrupted data error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::CorruptedData {
            offset,
            message: message.into(),
        }
    }

    /// Create a CRC mismatch error.
    pub fn crc_mismatch(expected: u32, computed: u32) -> Self {
        Self::CrcMismatch { expected, computed }
    }

    /// Create an unsupported method error.
    pub fn unsupported_method(method: impl Into<String>) -> Self {
        Self::UnsupportedMethod {
            method: method.into(),
        }
    }

    /// Create an external program error.
    pub fn program(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Program {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create an anomaly (warning) record.
    pub fn anomaly(message: impl Into<String>) -> Self {
        Self::Anomaly {
            message: message.into(),
        }
    }
}

impl From<io::Error> for ArchiveError {
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<ArchiveError>()) {
            return Self::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<ArchiveError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Self::Io(io::Error::new(kind, other)),
            None => Self::Io(io::Error::from(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ArchiveError::unsupported("filter", "xz");
        assert_eq!(err.to_string(), "filter 'xz' is not supported by this build");

        let err = ArchiveError::crc_mismatch(0x12345678, 0xDEADBEEF);
        assert!(err.to_string().contains("CRC mismatch"));

        let err = ArchiveError::hook("read", Status::Retry);
        assert_eq!(err.to_string(), "read hook returned RETRY");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ArchiveError::unsupported("format", "rar").status(), Status::Failed);
        assert_eq!(ArchiveError::UnrecognizedFormat.status(), Status::Fatal);
        assert_eq!(ArchiveError::hook("read", Status::Retry).status(), Status::Retry);
        assert_eq!(ArchiveError::anomaly("odd").status(), Status::Warn);
        assert!(ArchiveError::hook("read", Status::Retry).is_retry());
    }

    #[test]
    fn test_io_round_trip_preserves_error() {
        let io_err = ArchiveError::hook("read", Status::Retry).into_io();
        let back = ArchiveError::from(io_err);
        assert!(matches!(
            back,
            ArchiveError::Hook {
                op: "read",
                status: Status::Retry
            }
        ));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: ArchiveError = io_err.into();
        assert!(matches!(err, ArchiveError::Io(_)));
        assert_eq!(err.status(), Status::Fatal);
    }
}

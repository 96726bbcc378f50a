//! Outcome codes shared by every reader operation.
//!
//! A [`Status`] is the vocabulary the engine speaks at its public surface.
//! Internally operations return [`Result`](crate::error::Result) and every
//! [`ArchiveError`](crate::error::ArchiveError) maps onto exactly one status.

use std::fmt;

/// Numeric code for [`Status::Eof`].
pub const CODE_EOF: i32 = 1;
/// Numeric code for [`Status::Ok`].
pub const CODE_OK: i32 = 0;
/// Numeric code for [`Status::Retry`].
pub const CODE_RETRY: i32 = -10;
/// Numeric code for [`Status::Warn`].
pub const CODE_WARN: i32 = -20;
/// Numeric code for [`Status::Failed`].
pub const CODE_FAILED: i32 = -25;
/// Numeric code for [`Status::Fatal`].
pub const CODE_FATAL: i32 = -30;

/// Outcome of a reader operation.
///
/// `Ok` is the only "no error" value. Everything else, including `Eof`,
/// counts as an error for short-circuit checks via [`Status::is_error`].
/// Callers that need to tell `Warn`/`Retry` apart from `Failed`/`Fatal`
/// must match on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// End of data; the normal terminator of entry iteration.
    Eof,
    /// Success.
    #[default]
    Ok,
    /// Transient condition; the identical call may be repeated.
    Retry,
    /// Success with a non-fatal anomaly worth logging.
    Warn,
    /// The operation failed; the reader remains usable.
    Failed,
    /// The reader's state is no longer trustworthy; only close is safe.
    Fatal,
}

impl Status {
    /// Translate a numeric code into a status.
    ///
    /// # Panics
    ///
    /// Panics on a code outside the six known values. Such a code means a
    /// collaborator returned something the engine has no vocabulary for,
    /// which is a programming error rather than a runtime condition.
    pub fn from_code(code: i32) -> Self {
        match code {
            CODE_EOF => Self::Eof,
            CODE_OK => Self::Ok,
            CODE_RETRY => Self::Retry,
            CODE_WARN => Self::Warn,
            CODE_FAILED => Self::Failed,
            CODE_FATAL => Self::Fatal,
            other => panic!("unknown status code: {other}"),
        }
    }

    /// The numeric code of this status.
    pub const fn code(self) -> i32 {
        match self {
            Self::Eof => CODE_EOF,
            Self::Ok => CODE_OK,
            Self::Retry => CODE_RETRY,
            Self::Warn => CODE_WARN,
            Self::Failed => CODE_FAILED,
            Self::Fatal => CODE_FATAL,
        }
    }

    /// True only for [`Status::Ok`].
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// True for every status other than [`Status::Ok`].
    pub const fn is_error(self) -> bool {
        !self.is_ok()
    }

    /// True for [`Status::Fatal`].
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Fatal)
    }

    /// Short upper-case name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Eof => "EOF",
            Self::Ok => "OK",
            Self::Retry => "RETRY",
            Self::Warn => "WARN",
            Self::Failed => "FAILED",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 6] = [
        Status::Eof,
        Status::Ok,
        Status::Retry,
        Status::Warn,
        Status::Failed,
        Status::Fatal,
    ];

    #[test]
    fn test_code_translation() {
        for status in ALL {
            assert_eq!(Status::from_code(status.code()), status);
        }
        assert_eq!(Status::from_code(-30), Status::Fatal);
        assert_eq!(i32::from(Status::Retry), -10);
    }

    #[test]
    #[should_panic(expected = "unknown status code: 42")]
    fn test_unknown_code_panics() {
        let _ = Status::from_code(42);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Status::Ok.is_error());
        for status in ALL.into_iter().filter(|s| *s != Status::Ok) {
            assert!(status.is_error(), "{status} should be an error");
        }
        assert_eq!(Status::default(), Status::Ok);
    }
}

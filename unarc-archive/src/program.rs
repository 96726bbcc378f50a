//! External program filters.
//!
//! The bytes below the filter are spooled into an anonymous temporary file,
//! which then becomes the child's standard input; the filter reads the
//! child's standard output. Spooling first means no pump thread is needed
//! and the child can never deadlock against us.

use log::{debug, trace};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::process::{Child, ChildStdout, Command, Stdio};
use unarc_core::error::{ArchiveError, Result};
use unarc_core::stream::Upstream;
use unarc_core::traits::{Filter, FilterBidder};

/// Bids for an external decompression command.
#[derive(Debug)]
pub struct ProgramBidder {
    command: String,
    signature: Option<Vec<u8>>,
    inhibited: bool,
    spool: Option<File>,
}

impl ProgramBidder {
    /// A program tried unconditionally, once per open.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            signature: None,
            inhibited: false,
            spool: None,
        }
    }

    /// A program tried whenever the stream starts with `signature`.
    ///
    /// An empty signature is rejected; use [`ProgramBidder::new`] for
    /// unconditional programs.
    pub fn with_signature(command: impl Into<String>, signature: &[u8]) -> Result<Self> {
        let command = command.into();
        if signature.is_empty() {
            return Err(ArchiveError::unsupported(
                "filter",
                format!("program '{command}' with an empty signature"),
            ));
        }
        Ok(Self {
            command,
            signature: Some(signature.to_vec()),
            inhibited: false,
            spool: None,
        })
    }

    /// The command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The leading signature, if any.
    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    /// Copy everything below into the spool file. Progress survives a
    /// failed call: bytes are consumed only after they were written.
    fn spool_upstream(&mut self, upstream: &mut dyn Upstream) -> Result<File> {
        let mut spool = match self.spool.take() {
            Some(file) => file,
            None => tempfile::tempfile()?,
        };
        loop {
            let chunk = match upstream.peek(1) {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.spool = Some(spool);
                    return Err(err);
                }
            };
            if chunk.is_empty() {
                break;
            }
            let n = chunk.len();
            if let Err(err) = spool.write_all(chunk) {
                // a partial write leaves the spool unusable
                return Err(err.into());
            }
            upstream.consume(n);
        }
        spool.seek(SeekFrom::Start(0))?;
        Ok(spool)
    }
}

impl FilterBidder for ProgramBidder {
    fn name(&self) -> &str {
        "program"
    }

    fn bid(&mut self, upstream: &mut dyn Upstream) -> Result<u32> {
        match &self.signature {
            Some(signature) => {
                let head = upstream.peek(signature.len())?;
                Ok(if head.starts_with(signature) {
                    (signature.len() * 8) as u32
                } else {
                    0
                })
            }
            None if self.inhibited => Ok(0),
            None => Ok(u32::MAX),
        }
    }

    fn init(&mut self, upstream: &mut dyn Upstream) -> Result<Box<dyn Filter>> {
        let spool = self.spool_upstream(upstream)?;
        if self.signature.is_none() {
            self.inhibited = true;
        }

        debug!("program: spawning `{}`", self.command);
        let mut child = shell(&self.command)
            .stdin(Stdio::from(spool))
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|err| ArchiveError::program(&self.command, err.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ArchiveError::program(&self.command, "stdout was not captured"))?;

        Ok(Box::new(ProgramFilter {
            command: self.command.clone(),
            child,
            stdout,
            finished: false,
        }))
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Reads a running child's output.
#[derive(Debug)]
pub struct ProgramFilter {
    command: String,
    child: Child,
    stdout: ChildStdout,
    finished: bool,
}

impl Filter for ProgramFilter {
    fn name(&self) -> &str {
        "program"
    }

    fn read(&mut self, _upstream: &mut dyn Upstream, out: &mut [u8]) -> Result<usize> {
        if self.finished || out.is_empty() {
            return Ok(0);
        }
        let n = loop {
            match self.stdout.read(out) {
                Ok(n) => break n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        };
        if n > 0 {
            return Ok(n);
        }

        let status = self.child.wait()?;
        self.finished = true;
        trace!("program: `{}` exited with {}", self.command, status);
        if !status.success() {
            return Err(ArchiveError::program(
                &self.command,
                format!("exited with {status}"),
            ));
        }
        Ok(0)
    }
}

impl Drop for ProgramFilter {
    fn drop(&mut self) {
        if !self.finished {
            // Reader closed early; don't leave the child behind
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use unarc_core::stream::SliceStream;

    fn run(bidder: &mut ProgramBidder, input: &[u8]) -> Result<Vec<u8>> {
        let mut stream = SliceStream::new(input);
        let mut filter = bidder.init(&mut stream)?;
        let mut out = Vec::new();
        let mut buf = [0u8; 16];
        loop {
            let n = filter.read(&mut stream, &mut buf)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn test_signature_bid() {
        let mut bidder = ProgramBidder::with_signature("cat", b"MAGIC").unwrap();
        assert_eq!(bidder.bid(&mut SliceStream::new(b"MAGIC...")).unwrap(), 40);
        assert_eq!(bidder.bid(&mut SliceStream::new(b"MAGI")).unwrap(), 0);
        assert!(ProgramBidder::with_signature("cat", b"").is_err());
    }

    #[test]
    fn test_unconditional_bids_once() {
        let mut bidder = ProgramBidder::new("cat");
        assert_eq!(bidder.bid(&mut SliceStream::new(b"x")).unwrap(), u32::MAX);
        assert_eq!(run(&mut bidder, b"passthrough").unwrap(), b"passthrough");
        assert_eq!(bidder.bid(&mut SliceStream::new(b"x")).unwrap(), 0);
    }

    #[test]
    fn test_strip_signature() {
        let mut bidder = ProgramBidder::with_signature("tail -c +7", b"HEADER").unwrap();
        assert_eq!(run(&mut bidder, b"HEADERpayload").unwrap(), b"payload");
    }

    #[test]
    fn test_failing_program() {
        let mut bidder = ProgramBidder::new("exit 3");
        let err = run(&mut bidder, b"ignored").unwrap_err();
        assert!(matches!(err, ArchiveError::Program { .. }));
    }
}

//! Byte sources for the relay producer.
//!
//! A source distinguishes two failure points: [`ByteSource::open`] runs
//! before the transfer commits and may fail with an ordinary error, while
//! read errors and [`ByteStream::close`] failures happen mid-stream and can
//! only cancel the transfer.

use crate::config::Tools;
use crate::error::{Result, TransferError};
use std::io::{self, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

/// Something that can be started to produce a finite byte stream.
pub trait ByteSource {
    type Stream: ByteStream;

    /// Human-readable description, logged in verbose mode.
    fn describe(&self) -> String;

    /// Start the source. Failures here are setup errors.
    fn open(self) -> Result<Self::Stream>;
}

/// A started source. Read until EOF, then `close`.
pub trait ByteStream: Read {
    /// Release the source and report any failure it only reveals at the
    /// end, such as a non-zero exit status.
    fn close(self) -> io::Result<()>;
}

// =============================================================================
// ReaderSource
// =============================================================================

/// Relays an already-open reader: a file, a buffer, a pipe.
pub struct ReaderSource<R: Read> {
    label: String,
    reader: R,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(label: impl Into<String>, reader: R) -> Self {
        Self {
            label: label.into(),
            reader,
        }
    }
}

impl<R: Read> ByteSource for ReaderSource<R> {
    type Stream = Self;

    fn describe(&self) -> String {
        self.label.clone()
    }

    fn open(self) -> Result<Self> {
        Ok(self)
    }
}

impl<R: Read> Read for ReaderSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl<R: Read> ByteStream for ReaderSource<R> {
    fn close(self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// CommandSource
// =============================================================================

/// Relays the standard output of an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl ByteSource for CommandSource {
    type Stream = CommandStream;

    fn describe(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn open(self) -> Result<CommandStream> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| TransferError::setup(self.describe(), e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransferError::setup(self.describe(), "stdout not captured"))?;

        Ok(CommandStream {
            program: self.program,
            child,
            stdout: Some(stdout),
        })
    }
}

/// A running external program.
pub struct CommandStream {
    program: String,
    child: Child,
    stdout: Option<ChildStdout>,
}

impl Read for CommandStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stdout.as_mut() {
            Some(stdout) => stdout.read(buf),
            None => Ok(0),
        }
    }
}

impl ByteStream for CommandStream {
    fn close(mut self) -> io::Result<()> {
        drop(self.stdout.take());
        let status = self.child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} exited with {}", self.program, status),
            ))
        }
    }
}

impl Drop for CommandStream {
    fn drop(&mut self) {
        // Abandoned mid-stream: don't leave the child running.
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

// =============================================================================
// Extraction requests
// =============================================================================

/// Raw data extraction from a disk image by an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractRequest {
    /// Content of the file with the given inode.
    Icat { device: String, inode: i64 },
    /// `number` data units starting at `start`.
    Blkcat {
        device: String,
        start: i64,
        number: i64,
    },
    /// Unallocated data units in `start..=stop`.
    Blkls {
        device: String,
        start: i64,
        stop: i64,
    },
}

impl ExtractRequest {
    pub fn device(&self) -> &str {
        match self {
            ExtractRequest::Icat { device, .. }
            | ExtractRequest::Blkcat { device, .. }
            | ExtractRequest::Blkls { device, .. } => device,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            ExtractRequest::Icat { inode, .. } => check_inode(inode),
            ExtractRequest::Blkcat { start, number, .. } => {
                check_start(start)?;
                if number < 1 {
                    return Err(TransferError::Precondition(
                        "data unit number must be >= 1".into(),
                    ));
                }
                Ok(())
            }
            ExtractRequest::Blkls { start, stop, .. } => {
                check_start(start)?;
                if stop <= start {
                    return Err(TransferError::Precondition(
                        "data unit stopping address must be > starting one".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Validate and build the tool invocation.
    pub fn command(&self, tools: &Tools) -> Result<CommandSource> {
        self.validate()?;
        let source = match self {
            ExtractRequest::Icat { device, inode } => {
                let args = ["-r".to_string(), device.clone(), inode.to_string()];
                CommandSource::new(&tools.icat, args)
            }
            ExtractRequest::Blkcat {
                device,
                start,
                number,
            } => CommandSource::new(
                &tools.blkcat,
                [device.clone(), start.to_string(), number.to_string()],
            ),
            ExtractRequest::Blkls {
                device,
                start,
                stop,
            } => CommandSource::new(
                &tools.blkls,
                [device.clone(), format!("{}-{}", start, stop)],
            ),
        };
        Ok(source)
    }
}

pub(crate) fn check_inode(inode: i64) -> Result<()> {
    if inode < 0 {
        return Err(TransferError::Precondition("inode must be >= 0".into()));
    }
    Ok(())
}

fn check_start(start: i64) -> Result<()> {
    if start < 0 {
        return Err(TransferError::Precondition(
            "data unit starting address must be >= 0".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Tools {
        Tools::default()
    }

    #[test]
    fn test_icat_command() {
        let req = ExtractRequest::Icat {
            device: "/dev/sda1".into(),
            inode: 12,
        };
        let cmd = req.command(&tools()).unwrap();
        assert_eq!(cmd.describe(), "icat -r /dev/sda1 12");
    }

    #[test]
    fn test_blkcat_command() {
        let req = ExtractRequest::Blkcat {
            device: "/dev/sda1".into(),
            start: 0,
            number: 3,
        };
        assert_eq!(req.command(&tools()).unwrap().describe(), "blkcat /dev/sda1 0 3");
    }

    #[test]
    fn test_blkls_command() {
        let req = ExtractRequest::Blkls {
            device: "/dev/sda1".into(),
            start: 10,
            stop: 20,
        };
        assert_eq!(req.command(&tools()).unwrap().describe(), "blkls /dev/sda1 10-20");
    }

    #[test]
    fn test_preconditions() {
        let bad = [
            ExtractRequest::Icat {
                device: "d".into(),
                inode: -1,
            },
            ExtractRequest::Blkcat {
                device: "d".into(),
                start: -1,
                number: 1,
            },
            ExtractRequest::Blkcat {
                device: "d".into(),
                start: 0,
                number: 0,
            },
            ExtractRequest::Blkls {
                device: "d".into(),
                start: 5,
                stop: 5,
            },
        ];
        for req in bad {
            let err = req.command(&tools()).unwrap_err();
            assert!(matches!(err, TransferError::Precondition(_)), "{:?}", req);
        }
    }

    #[test]
    fn test_precondition_messages() {
        let err = ExtractRequest::Blkls {
            device: "d".into(),
            start: 9,
            stop: 3,
        }
        .validate()
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "data unit stopping address must be > starting one"
        );
    }

    #[test]
    fn test_reader_source_reads_through() {
        let mut stream = ReaderSource::new("buffer", &b"abc"[..]).open().unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
        stream.close().unwrap();
    }

    #[test]
    fn test_missing_program_is_setup_error() {
        let source = CommandSource::new("sleuthxfer-no-such-tool", Vec::<String>::new());
        let err = source.open().err().unwrap();
        assert!(matches!(err, TransferError::Setup { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_stream_exit_status() {
        let mut ok = CommandSource::new("sh", ["-c", "printf hi"]).open().unwrap();
        let mut out = String::new();
        ok.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hi");
        ok.close().unwrap();

        let mut failed = CommandSource::new("sh", ["-c", "exit 3"]).open().unwrap();
        let mut sink = Vec::new();
        failed.read_to_end(&mut sink).unwrap();
        assert!(failed.close().is_err());
    }
}

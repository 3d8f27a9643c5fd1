//! Server mode - runs when invoked as `sleuthxfer serve <request>`
//!
//! Answers exactly one request on a [`FramedChannel`]. Errors detected
//! before the commit are sent back as an error reply; after the commit the
//! producers can only cancel.

use std::io::Write;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::Result;
use crate::lookup::find_inode;
use crate::source::ExtractRequest;
use crate::streaming::{
    ByteRelayProducer, ChunkedTransferChannel, FramedChannel, Outcome, RecordStreamProducer,
    RelayConfig, Transfer,
};
use crate::walk::HostDirOpener;

/// One request a server can answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Every entry below `root`, as a record stream.
    FilesystemWalk { root: PathBuf },
    /// Raw bytes extracted by an external tool.
    Extract(ExtractRequest),
    /// The name of one inode, as a single record.
    FindInode { device: String, inode: i64 },
}

impl Request {
    /// Arguments after `serve` that reproduce this request on the command
    /// line of a server process.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Request::FilesystemWalk { root } => {
                vec!["walk".into(), root.to_string_lossy().into_owned()]
            }
            Request::Extract(ExtractRequest::Icat { device, inode }) => {
                vec!["icat".into(), device.clone(), inode.to_string()]
            }
            Request::Extract(ExtractRequest::Blkcat {
                device,
                start,
                number,
            }) => vec![
                "blkcat".into(),
                device.clone(),
                start.to_string(),
                number.to_string(),
            ],
            Request::Extract(ExtractRequest::Blkls {
                device,
                start,
                stop,
            }) => vec![
                "blkls".into(),
                device.clone(),
                start.to_string(),
                stop.to_string(),
            ],
            Request::FindInode { device, inode } => {
                vec!["find-inode".into(), device.clone(), inode.to_string()]
            }
        }
    }
}

/// Answer `request` on `writer`.
pub fn serve<W: Write>(request: &Request, config: &Config, writer: W) -> Result<Outcome> {
    let mut channel = FramedChannel::new(writer);
    let result = dispatch(request, config, &mut channel);
    conclude(&mut channel, result)
}

/// Answer `request` on `writer` with a config that may have failed to
/// load. A load failure is replied like any other pre-commit error.
pub fn serve_loaded<W: Write>(
    request: &Request,
    config: Result<Config>,
    writer: W,
) -> Result<Outcome> {
    let mut channel = FramedChannel::new(writer);
    let result = config.and_then(|config| dispatch(request, &config, &mut channel));
    conclude(&mut channel, result)
}

fn conclude<W: Write>(
    channel: &mut FramedChannel<W>,
    result: Result<Outcome>,
) -> Result<Outcome> {
    match result {
        Ok(outcome) => {
            tracing::debug!(?outcome, "request done");
            Ok(outcome)
        }
        Err(e) => {
            tracing::debug!("request failed before commit: {}", e);
            if let Err(reply_err) = channel.reply_error(&e.to_string()) {
                tracing::warn!("failed to send error reply: {}", reply_err);
            }
            Err(e)
        }
    }
}

/// Run the producer for `request` on any channel.
pub fn dispatch<C>(request: &Request, config: &Config, channel: &mut C) -> Result<Outcome>
where
    C: ChunkedTransferChannel + ?Sized,
{
    match request {
        Request::FilesystemWalk { root } => {
            RecordStreamProducer::new(HostDirOpener).stream(channel, root)
        }
        Request::Extract(extract) => {
            let source = extract.command(&config.tools)?;
            ByteRelayProducer::new(RelayConfig {
                verbose: config.verbose,
            })
            .relay(channel, source)
        }
        Request::FindInode { device, inode } => {
            let record = find_inode(&config.tools, device, *inode, config.verbose)?;
            let stream = Transfer::new(channel).commit()?;
            Ok(stream.run(|stream| {
                let chunk = record.encode()?;
                stream.write_chunk(&chunk)
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;
    use crate::streaming::{fetch_dirents, receive_transfer};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_serve_walk_roundtrip() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        fs::write(temp.path().join("b.txt"), "b").unwrap();

        let mut wire = Vec::new();
        let request = Request::FilesystemWalk {
            root: temp.path().to_path_buf(),
        };
        let outcome = serve(&request, &Config::default(), &mut wire).unwrap();
        assert!(outcome.is_success());

        let list = fetch_dirents(&mut &wire[..]).unwrap();
        let names: Vec<_> = list.iter().map(|r| r.name_lossy().into_owned()).collect();
        assert_eq!(names, vec!["/a.txt", "/b.txt"]);
    }

    #[test]
    fn test_precondition_becomes_error_reply() {
        let mut wire = Vec::new();
        let request = Request::Extract(ExtractRequest::Icat {
            device: "/dev/sda1".into(),
            inode: -3,
        });
        let err = serve(&request, &Config::default(), &mut wire).unwrap_err();
        assert!(matches!(err, TransferError::Precondition(_)));

        match receive_transfer(&mut &wire[..]).unwrap_err() {
            TransferError::Remote(msg) => assert_eq!(msg, "inode must be >= 0"),
            other => panic!("Expected Remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_root_becomes_error_reply() {
        let temp = TempDir::new().unwrap();
        let mut wire = Vec::new();
        let request = Request::FilesystemWalk {
            root: temp.path().join("missing"),
        };
        assert!(serve(&request, &Config::default(), &mut wire).is_err());
        assert!(matches!(
            receive_transfer(&mut &wire[..]),
            Err(TransferError::Remote(_))
        ));
    }

    #[test]
    fn test_config_failure_becomes_error_reply() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.toml");
        let request = Request::FilesystemWalk {
            root: temp.path().to_path_buf(),
        };

        let mut wire = Vec::new();
        let err = serve_loaded(&request, Config::load(Some(&missing)), &mut wire).unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));

        match receive_transfer(&mut &wire[..]).unwrap_err() {
            TransferError::Remote(msg) => assert!(msg.contains("missing.toml"), "{}", msg),
            other => panic!("Expected Remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_serve_loaded_with_config() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("only.txt"), "x").unwrap();
        let request = Request::FilesystemWalk {
            root: temp.path().to_path_buf(),
        };

        let mut wire = Vec::new();
        let outcome = serve_loaded(&request, Ok(Config::default()), &mut wire).unwrap();
        assert!(outcome.is_success());
        assert_eq!(fetch_dirents(&mut &wire[..]).unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_extract_relays_tool_output() {
        let mut config = Config::default();
        config.tools.icat = "echo".into();

        let mut wire = Vec::new();
        let request = Request::Extract(ExtractRequest::Icat {
            device: "/dev/sda1".into(),
            inode: 12,
        });
        serve(&request, &config, &mut wire).unwrap();

        let payload = receive_transfer(&mut &wire[..]).unwrap();
        assert_eq!(&payload[..], b"-r /dev/sda1 12\n");
    }

    #[test]
    fn test_to_args() {
        let request = Request::Extract(ExtractRequest::Blkls {
            device: "/dev/sdb".into(),
            start: 1,
            stop: 9,
        });
        assert_eq!(request.to_args(), vec!["blkls", "/dev/sdb", "1", "9"]);
    }
}

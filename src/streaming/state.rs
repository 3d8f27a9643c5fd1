//! Commit-then-stream state machine.
//!
//! ```text
//! NotStarted --commit--> Committed --write_chunk*--> Streaming --+--> Ended(Normal)
//!                                                                +--> Ended(Cancelled)
//! ```
//!
//! The two halves are separate types. [`Transfer`] is the `NotStarted`
//! side and may fail with a [`TransferError`]. [`Stream`] is everything
//! after the commit header went out; its methods only produce an
//! [`Outcome`], so a post-commit failure cannot be reported as anything
//! but a cancellation.

use crate::error::{Result, StreamError};
use crate::streaming::channel::ChunkedTransferChannel;
use crate::streaming::protocol::EndStatus;

/// Observable state of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    NotStarted,
    Committed,
    Streaming,
    Ended(EndStatus),
}

/// Totals for a transfer that ended normally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivered {
    pub chunks: u64,
    pub bytes: u64,
}

/// Caller-visible result of a committed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success(Delivered),
    /// Ended abnormally; nothing delivered may be used.
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn end_status(&self) -> EndStatus {
        match self {
            Outcome::Success(_) => EndStatus::Normal,
            Outcome::Cancelled => EndStatus::Cancelled,
        }
    }

    /// The terminal state the transfer ended in.
    pub fn state(&self) -> TransferState {
        TransferState::Ended(self.end_status())
    }
}

/// A transfer that has not committed yet.
pub struct Transfer<'c, C: ChunkedTransferChannel + ?Sized> {
    channel: &'c mut C,
}

impl<'c, C: ChunkedTransferChannel + ?Sized> Transfer<'c, C> {
    pub fn new(channel: &'c mut C) -> Self {
        Self { channel }
    }

    pub fn state(&self) -> TransferState {
        TransferState::NotStarted
    }

    /// Send the header reply. After this the request counts as a success
    /// and only cancellation can signal failure.
    ///
    /// If the header cannot be sent the transfer never left `NotStarted`
    /// and the I/O error is returned as an ordinary error.
    pub fn commit(self) -> Result<Stream<'c, C>> {
        self.channel.commit()?;
        tracing::debug!("transfer committed");
        Ok(Stream {
            channel: self.channel,
            state: TransferState::Committed,
            delivered: Delivered::default(),
        })
    }
}

/// A committed transfer.
pub struct Stream<'c, C: ChunkedTransferChannel + ?Sized> {
    channel: &'c mut C,
    state: TransferState,
    delivered: Delivered,
}

impl<'c, C: ChunkedTransferChannel + ?Sized> Stream<'c, C> {
    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn delivered(&self) -> Delivered {
        self.delivered
    }

    /// Write one chunk. Empty slices are skipped: the protocol has no
    /// zero-length chunks.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> std::result::Result<(), StreamError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.state = TransferState::Streaming;
        self.channel.write_chunk(chunk).map_err(StreamError::Write)?;
        self.delivered.chunks += 1;
        self.delivered.bytes += chunk.len() as u64;
        Ok(())
    }

    /// End normally. A failure to send the end marker leaves the receiver
    /// without a normal end, so it is reported as a cancellation.
    pub fn finish(self) -> Outcome {
        match self.channel.end(EndStatus::Normal) {
            Ok(()) => {
                tracing::debug!(
                    chunks = self.delivered.chunks,
                    bytes = self.delivered.bytes,
                    "transfer ended"
                );
                Outcome::Success(self.delivered)
            }
            Err(e) => {
                tracing::warn!("failed to send end of transfer: {}", e);
                Outcome::Cancelled
            }
        }
    }

    /// End with the cancellation marker. `reason` is only logged.
    pub fn cancel(self, reason: &StreamError) -> Outcome {
        tracing::warn!(
            chunks = self.delivered.chunks,
            "cancelling transfer: {}",
            reason
        );
        if let Err(e) = self.channel.end(EndStatus::Cancelled) {
            tracing::warn!("failed to send cancellation: {}", e);
        }
        Outcome::Cancelled
    }

    /// Run `body` against this stream, then finish or cancel depending on
    /// its result.
    pub fn run<F>(mut self, body: F) -> Outcome
    where
        F: FnOnce(&mut Self) -> std::result::Result<(), StreamError>,
    {
        match body(&mut self) {
            Ok(()) => self.finish(),
            Err(e) => self.cancel(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::channel::{ChannelEvent, MemoryChannel};
    use bytes::Bytes;
    use std::io;

    #[test]
    fn test_normal_transfer() {
        let mut channel = MemoryChannel::new();
        let transfer = Transfer::new(&mut channel);
        assert_eq!(transfer.state(), TransferState::NotStarted);

        let mut stream = transfer.commit().unwrap();
        assert_eq!(stream.state(), TransferState::Committed);
        stream.write_chunk(b"abc").unwrap();
        assert_eq!(stream.state(), TransferState::Streaming);
        let outcome = stream.finish();
        assert_eq!(outcome.state(), TransferState::Ended(EndStatus::Normal));

        assert_eq!(
            outcome,
            Outcome::Success(Delivered {
                chunks: 1,
                bytes: 3
            })
        );
        assert_eq!(
            channel.events(),
            &[
                ChannelEvent::Commit,
                ChannelEvent::Chunk(Bytes::from_static(b"abc")),
                ChannelEvent::End(EndStatus::Normal),
            ]
        );
    }

    #[test]
    fn test_run_cancels_on_error() {
        let mut channel = MemoryChannel::new();
        let stream = Transfer::new(&mut channel).commit().unwrap();
        let outcome = stream.run(|s| {
            s.write_chunk(b"partial")?;
            Err(StreamError::Read(io::Error::new(io::ErrorKind::Other, "boom")))
        });

        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(outcome.end_status(), EndStatus::Cancelled);
        assert_eq!(outcome.state(), TransferState::Ended(EndStatus::Cancelled));
        assert_eq!(channel.end_status(), Some(EndStatus::Cancelled));
    }

    #[test]
    fn test_empty_chunks_are_skipped() {
        let mut channel = MemoryChannel::new();
        let outcome = Transfer::new(&mut channel)
            .commit()
            .unwrap()
            .run(|s| s.write_chunk(b""));
        assert_eq!(outcome, Outcome::Success(Delivered::default()));
        assert_eq!(channel.chunks().count(), 0);
    }

    #[test]
    fn test_write_failure_is_stream_error() {
        let mut channel = MemoryChannel::failing_after(0);
        let mut stream = Transfer::new(&mut channel).commit().unwrap();
        let err = stream.write_chunk(b"x").unwrap_err();
        assert!(matches!(err, StreamError::Write(_)));
        assert_eq!(stream.cancel(&err), Outcome::Cancelled);
    }

    struct BrokenHeader;

    impl ChunkedTransferChannel for BrokenHeader {
        fn commit(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn write_chunk(&mut self, _chunk: &[u8]) -> io::Result<()> {
            unreachable!("no chunk may follow a failed commit")
        }
        fn end(&mut self, _status: EndStatus) -> io::Result<()> {
            unreachable!("no end may follow a failed commit")
        }
    }

    #[test]
    fn test_failed_commit_is_ordinary_error() {
        let mut channel = BrokenHeader;
        assert!(Transfer::new(&mut channel).commit().is_err());
    }
}

//! Chunked transfer channels.
//!
//! A channel carries exactly one transfer: an optional commit header, zero
//! or more chunks, and one terminal end marker. Producers never talk to a
//! channel directly; they go through [`Transfer`](super::state::Transfer),
//! which enforces the ordering.

use crate::streaming::protocol::{write_frame, EndStatus, Frame, MAX_CHUNK_SIZE};
use bytes::{Bytes, BytesMut};
use std::io::{self, Write};

/// The three operations a producer may perform on a transport.
pub trait ChunkedTransferChannel {
    /// Send the header declaring overall success. At most once.
    fn commit(&mut self) -> io::Result<()>;

    /// Append one opaque chunk. Only legal after `commit`.
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Terminal call. `Cancelled` tells the receiver to discard everything.
    fn end(&mut self, status: EndStatus) -> io::Result<()>;
}

/// Where a channel is in its one-shot lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Committed,
    Closed,
}

fn misuse(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}

impl Phase {
    fn check_commit(self) -> io::Result<()> {
        match self {
            Phase::Open => Ok(()),
            Phase::Committed => Err(misuse("commit sent twice")),
            Phase::Closed => Err(misuse("commit after end")),
        }
    }

    fn check_chunk(self, chunk: &[u8]) -> io::Result<()> {
        match self {
            Phase::Committed => {}
            Phase::Open => return Err(misuse("chunk before commit")),
            Phase::Closed => return Err(misuse("chunk after end")),
        }
        if chunk.is_empty() || chunk.len() > MAX_CHUNK_SIZE {
            return Err(misuse("chunk size outside protocol limits"));
        }
        Ok(())
    }

    fn check_end(self) -> io::Result<()> {
        match self {
            Phase::Committed => Ok(()),
            Phase::Open => Err(misuse("end before commit")),
            Phase::Closed => Err(misuse("end sent twice")),
        }
    }
}

// =============================================================================
// FramedChannel: frames over a byte stream
// =============================================================================

/// Channel writing [`Frame`]s to any `Write`, typically stdout of a server
/// process or a socket.
pub struct FramedChannel<W: Write> {
    writer: W,
    phase: Phase,
}

impl<W: Write> FramedChannel<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            phase: Phase::Open,
        }
    }

    /// Report a pre-commit failure to the receiver. Consumes the transfer:
    /// nothing may follow an error reply.
    pub fn reply_error(&mut self, message: &str) -> io::Result<()> {
        self.phase.check_commit()?;
        let mut end = message.len().min(MAX_CHUNK_SIZE);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        write_frame(&mut self.writer, &Frame::Error(message[..end].to_string()))?;
        self.writer.flush()?;
        self.phase = Phase::Closed;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ChunkedTransferChannel for FramedChannel<W> {
    fn commit(&mut self) -> io::Result<()> {
        self.phase.check_commit()?;
        write_frame(&mut self.writer, &Frame::Reply)?;
        self.writer.flush()?;
        self.phase = Phase::Committed;
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.phase.check_chunk(chunk)?;
        write_frame(&mut self.writer, &Frame::Chunk(Bytes::copy_from_slice(chunk)))
    }

    fn end(&mut self, status: EndStatus) -> io::Result<()> {
        self.phase.check_end()?;
        // No further operations are legal even if this write fails.
        self.phase = Phase::Closed;
        write_frame(&mut self.writer, &Frame::End(status))?;
        self.writer.flush()
    }
}

// =============================================================================
// MemoryChannel: in-process transfers
// =============================================================================

/// Everything a [`MemoryChannel`] observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Commit,
    Chunk(Bytes),
    End(EndStatus),
}

/// Channel that keeps the transfer in memory. Used when producer and
/// consumer share a process, and by tests.
#[derive(Debug)]
pub struct MemoryChannel {
    events: Vec<ChannelEvent>,
    phase: Phase,
    /// Chunk writes after this many succeed start failing.
    fail_after_chunks: Option<usize>,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            phase: Phase::Open,
            fail_after_chunks: None,
        }
    }

    /// A channel whose chunk writes fail once `n` chunks were accepted.
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after_chunks: Some(n),
            ..Self::new()
        }
    }

    pub fn events(&self) -> &[ChannelEvent] {
        &self.events
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Bytes> {
        self.events.iter().filter_map(|e| match e {
            ChannelEvent::Chunk(data) => Some(data),
            _ => None,
        })
    }

    pub fn end_status(&self) -> Option<EndStatus> {
        self.events.iter().find_map(|e| match e {
            ChannelEvent::End(status) => Some(*status),
            _ => None,
        })
    }

    /// Reassemble the payload the way a receiver would. `None` if the
    /// transfer was cancelled or never ended.
    pub fn into_payload(self) -> Option<Bytes> {
        if self.end_status() != Some(EndStatus::Normal) {
            return None;
        }
        let mut buf = BytesMut::new();
        for chunk in self.chunks() {
            buf.extend_from_slice(chunk);
        }
        Some(buf.freeze())
    }
}

impl ChunkedTransferChannel for MemoryChannel {
    fn commit(&mut self) -> io::Result<()> {
        self.phase.check_commit()?;
        self.events.push(ChannelEvent::Commit);
        self.phase = Phase::Committed;
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.phase.check_chunk(chunk)?;
        if let Some(limit) = self.fail_after_chunks {
            if self.chunks().count() >= limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "receiver gone"));
            }
        }
        self.events.push(ChannelEvent::Chunk(Bytes::copy_from_slice(chunk)));
        Ok(())
    }

    fn end(&mut self, status: EndStatus) -> io::Result<()> {
        self.phase.check_end()?;
        self.phase = Phase::Closed;
        self.events.push(ChannelEvent::End(status));
        Ok(())
    }
}

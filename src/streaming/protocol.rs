//! Wire formats for the transfer protocol.
//!
//! Two layers live here:
//!
//! 1. Frames carried by [`FramedChannel`](super::channel::FramedChannel):
//!    `len:u32 | kind:u8 | payload[len]`.
//! 2. The self-describing directory entry record, one per chunk in
//!    record-stream mode.
//!
//! All multi-byte integers are big-endian.

use crate::error::{Result, StreamError, TransferError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{Read, Write};

/// Largest chunk a producer may write. Also the relay read-buffer size and
/// the upper bound for one encoded record.
pub const MAX_CHUNK_SIZE: usize = 8192;

/// Maximum accepted frame payload (a chunk or an error message plus slack).
pub const MAX_FRAME_SIZE: u32 = (2 * MAX_CHUNK_SIZE) as u32;

/// Frame header: u32 payload length + u8 kind.
pub const FRAME_HEADER_SIZE: usize = 5;

// =============================================================================
// Frames
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Reply = 0x01,
    Error = 0x02,
    Chunk = 0x03,
    End = 0x04,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Reply),
            0x02 => Some(Self::Error),
            0x03 => Some(Self::Chunk),
            0x04 => Some(Self::End),
            _ => None,
        }
    }
}

/// Terminal status of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EndStatus {
    Normal = 0,
    /// The receiver must discard every chunk of this transfer.
    Cancelled = 1,
}

impl EndStatus {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Normal),
            1 => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Commit header: the request succeeded, payload follows.
    Reply,
    /// Pre-commit failure; no payload follows.
    Error(String),
    Chunk(Bytes),
    End(EndStatus),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Reply => FrameKind::Reply,
            Frame::Error(_) => FrameKind::Error,
            Frame::Chunk(_) => FrameKind::Chunk,
            Frame::End(_) => FrameKind::End,
        }
    }

    pub fn encode(&self) -> Bytes {
        let payload_len = match self {
            Frame::Reply => 0,
            Frame::Error(msg) => msg.len(),
            Frame::Chunk(data) => data.len(),
            Frame::End(_) => 1,
        };
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_u32(payload_len as u32);
        buf.put_u8(self.kind() as u8);
        match self {
            Frame::Reply => {}
            Frame::Error(msg) => buf.put_slice(msg.as_bytes()),
            Frame::Chunk(data) => buf.put_slice(data),
            Frame::End(status) => buf.put_u8(*status as u8),
        }
        buf.freeze()
    }

    pub fn decode(kind: FrameKind, mut payload: Bytes) -> Result<Self> {
        match kind {
            FrameKind::Reply => {
                if !payload.is_empty() {
                    return Err(TransferError::Protocol(format!(
                        "reply frame carries {} unexpected bytes",
                        payload.len()
                    )));
                }
                Ok(Frame::Reply)
            }
            FrameKind::Error => {
                let msg = String::from_utf8_lossy(&payload).into_owned();
                Ok(Frame::Error(msg))
            }
            FrameKind::Chunk => {
                if payload.is_empty() || payload.len() > MAX_CHUNK_SIZE {
                    return Err(TransferError::Protocol(format!(
                        "chunk size {} outside 1..={}",
                        payload.len(),
                        MAX_CHUNK_SIZE
                    )));
                }
                Ok(Frame::Chunk(payload))
            }
            FrameKind::End => {
                if payload.remaining() != 1 {
                    return Err(TransferError::Protocol("malformed end frame".into()));
                }
                let raw = payload.get_u8();
                let status = EndStatus::from_u8(raw).ok_or_else(|| {
                    TransferError::Protocol(format!("unknown end status {}", raw))
                })?;
                Ok(Frame::End(status))
            }
        }
    }
}

/// Read a single frame from the stream.
pub fn read_frame<R: Read + ?Sized>(r: &mut R) -> Result<Frame> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    r.read_exact(&mut header)?;
    let mut header = &header[..];
    let len = header.get_u32();
    let raw_kind = header.get_u8();

    // Validate frame size before allocation
    if len > MAX_FRAME_SIZE {
        return Err(TransferError::Protocol(format!(
            "frame size {} exceeds maximum allowed size {}",
            len, MAX_FRAME_SIZE
        )));
    }
    let kind = FrameKind::from_u8(raw_kind)
        .ok_or_else(|| TransferError::Protocol(format!("unknown frame kind {:#04x}", raw_kind)))?;

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;

    Frame::decode(kind, Bytes::from(payload))
}

/// Write a frame to the stream.
pub fn write_frame<W: Write + ?Sized>(w: &mut W, frame: &Frame) -> std::io::Result<()> {
    w.write_all(&frame.encode())
}

// =============================================================================
// Directory entry records
// =============================================================================

/// Fixed part of a record: name length, inode and allocation flag.
const RECORD_FIXED_SIZE: usize = 4 + 8 + 4;

/// One filesystem entry fact as carried on the wire.
///
/// Layout: `name_len:u32 | name | zero pad to 4 | inode:u64 | allocated:u32`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirectoryEntryRecord {
    /// Parent path concatenated with the entry name. Raw bytes, no
    /// terminator.
    pub name: Vec<u8>,
    pub inode: u64,
    pub allocated: bool,
}

/// Bytes needed to pad `len` up to a multiple of 4.
pub fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

impl DirectoryEntryRecord {
    pub fn new(name: impl Into<Vec<u8>>, inode: u64, allocated: bool) -> Self {
        Self {
            name: name.into(),
            inode,
            allocated,
        }
    }

    /// Size of this record once encoded.
    pub fn encoded_len(&self) -> usize {
        RECORD_FIXED_SIZE + self.name.len() + padding(self.name.len())
    }

    /// Name for display; invalid UTF-8 is replaced.
    pub fn name_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    /// Encode as a single chunk. Fails if the record does not fit in one.
    pub fn encode(&self) -> std::result::Result<Bytes, StreamError> {
        let len = self.encoded_len();
        if len > MAX_CHUNK_SIZE {
            return Err(StreamError::Encode(format!(
                "record for {:?} needs {} bytes, chunk limit is {}",
                self.name_lossy(),
                len,
                MAX_CHUNK_SIZE
            )));
        }
        let mut buf = BytesMut::with_capacity(len);
        self.put(&mut buf);
        Ok(buf.freeze())
    }

    /// Append the encoding to `buf` without the chunk size check.
    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u32(self.name.len() as u32);
        buf.put_slice(&self.name);
        buf.put_bytes(0, padding(self.name.len()));
        buf.put_u64(self.inode);
        buf.put_u32(u32::from(self.allocated));
    }

    /// Decode one record from the front of `buf`, advancing it past the
    /// record. On error `buf` is left at an unspecified position.
    pub fn decode(buf: &mut &[u8]) -> std::result::Result<Self, String> {
        if buf.remaining() < 4 {
            return Err(format!(
                "name length truncated: {} of 4 bytes present",
                buf.remaining()
            ));
        }
        let name_len = buf.get_u32() as usize;
        let padded = name_len
            .checked_add(padding(name_len))
            .ok_or_else(|| format!("name length {} overflows", name_len))?;
        if buf.remaining() < padded {
            return Err(format!(
                "name truncated: expected {} bytes, got {}",
                padded,
                buf.remaining()
            ));
        }
        let name = buf[..name_len].to_vec();
        buf.advance(padded);

        if buf.remaining() < 8 {
            return Err(format!(
                "inode truncated: {} of 8 bytes present",
                buf.remaining()
            ));
        }
        let inode = buf.get_u64();

        if buf.remaining() < 4 {
            return Err(format!(
                "allocation flag truncated: {} of 4 bytes present",
                buf.remaining()
            ));
        }
        let allocated = match buf.get_u32() {
            0 => false,
            1 => true,
            other => return Err(format!("invalid allocation flag {}", other)),
        };

        Ok(Self {
            name,
            inode,
            allocated,
        })
    }
}

/// Concatenate the encodings of `records`, as a receiver would see them
/// after reassembling one chunk per record.
pub fn encode_records<'a, I>(records: I) -> Bytes
where
    I: IntoIterator<Item = &'a DirectoryEntryRecord>,
{
    let mut buf = BytesMut::new();
    for record in records {
        record.put(&mut buf);
    }
    buf.freeze()
}

// =============================================================================
// Tests
// =============================================================================

//! Consumer side of a framed transfer.
//!
//! Reads the reply header, then chunks until the end marker. A cancelled
//! end turns everything received so far into garbage: the buffered
//! variants drop it, the streaming variant leaves discarding the output to
//! its caller.

use crate::error::{Result, TransferError};
use crate::streaming::decoder::{decode, DirentList};
use crate::streaming::protocol::{read_frame, EndStatus, Frame};
use bytes::{Bytes, BytesMut};
use std::io::{Read, Write};

/// Wait for the reply header. An error reply ends the transfer here.
fn expect_commit<R: Read + ?Sized>(reader: &mut R) -> Result<()> {
    match read_frame(reader)? {
        Frame::Reply => Ok(()),
        Frame::Error(msg) => Err(TransferError::Remote(msg)),
        other => Err(TransferError::Protocol(format!(
            "expected reply, got {:?}",
            other.kind()
        ))),
    }
}

/// Feed every chunk to `on_chunk` until the end marker.
fn receive_chunks<R, F>(reader: &mut R, mut on_chunk: F) -> Result<u64>
where
    R: Read + ?Sized,
    F: FnMut(Bytes) -> Result<()>,
{
    expect_commit(reader)?;

    let mut total = 0u64;
    loop {
        match read_frame(reader)? {
            Frame::Chunk(data) => {
                total += data.len() as u64;
                on_chunk(data)?;
            }
            Frame::End(EndStatus::Normal) => return Ok(total),
            Frame::End(EndStatus::Cancelled) => {
                tracing::debug!(discarded = total, "transfer cancelled by producer");
                return Err(TransferError::Cancelled);
            }
            other => {
                return Err(TransferError::Protocol(format!(
                    "unexpected {:?} frame after commit",
                    other.kind()
                )))
            }
        }
    }
}

/// Receive a whole transfer into memory.
pub fn receive_transfer<R: Read + ?Sized>(reader: &mut R) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    receive_chunks(reader, |chunk| {
        buf.extend_from_slice(&chunk);
        Ok(())
    })?;
    Ok(buf.freeze())
}

/// Stream a transfer into `writer`, returning the byte count.
///
/// On [`TransferError::Cancelled`] the writer already holds part of the
/// payload, which must be thrown away.
pub fn receive_to_writer<R, W>(reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let total = receive_chunks(reader, |chunk| {
        writer.write_all(&chunk)?;
        Ok(())
    })?;
    writer.flush()?;
    Ok(total)
}

/// Receive a record-stream transfer and decode it.
pub fn fetch_dirents<R: Read + ?Sized>(reader: &mut R) -> Result<DirentList> {
    let payload = receive_transfer(reader)?;
    Ok(decode(&payload)?)
}

//! Error types shared by the producer and consumer sides.
//!
//! Only failures detected before a transfer is committed surface as
//! [`TransferError`]. Anything that goes wrong afterwards is a
//! [`StreamError`], which never leaves the transfer state machine: it is
//! logged and collapsed into a cancelled end of stream.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Invalid caller-supplied parameters, rejected before commit.
    #[error("{0}")]
    Precondition(String),

    /// The byte source or walk engine could not be opened or started.
    #[error("{what}: {reason}")]
    Setup { what: String, reason: String },

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// The lookup target does not exist (e.g. an inode with no name).
    #[error("{0}")]
    NotFound(String),

    /// The commit header or an error reply could not be sent.
    #[error("channel error: {0}")]
    Channel(#[from] io::Error),

    /// Consumer side: the producer replied with an error instead of committing.
    #[error("remote error: {0}")]
    Remote(String),

    /// Consumer side: the producer cancelled the transfer after committing.
    #[error("transfer cancelled by producer")]
    Cancelled,

    /// Consumer side: the frame stream itself is malformed.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Corruption(#[from] CorruptionError),
}

impl TransferError {
    pub fn setup(what: impl Into<String>, reason: impl ToString) -> Self {
        TransferError::Setup {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

/// A record stream that cannot be decoded into well-formed records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("corrupt record {index} at offset {offset}: {reason}")]
pub struct CorruptionError {
    /// Zero-based index of the record being decoded.
    pub index: usize,
    /// Byte offset where that record starts.
    pub offset: usize,
    pub reason: String,
}

/// A failure after commit. Never returned to callers of a producer.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("chunk write failed: {0}")]
    Write(#[source] io::Error),

    #[error("source read failed: {0}")]
    Read(#[source] io::Error),

    #[error("source failed on close: {0}")]
    Close(#[source] io::Error),

    #[error("record encoding failed: {0}")]
    Encode(String),

    #[error("walk failed: {0}")]
    Walk(String),
}

//! Commit-then-stream transfer of forensic results.
//!
//! A producer answers a request with one reply header and then streams the
//! payload in chunks: either raw bytes from an extraction tool, or one
//! binary record per directory entry from a filesystem walk. Failures
//! after the header can only cancel the stream. The consumer reassembles
//! the chunks and, for directory listings, decodes the records.

pub mod config;
pub mod error;
pub mod lookup;
pub mod server;
pub mod source;
pub mod streaming;
pub mod transport;
pub mod walk;

pub use config::Config;
pub use error::{CorruptionError, Result, StreamError, TransferError};
pub use streaming::{decode, DirectoryEntryRecord, DirentList, Outcome};

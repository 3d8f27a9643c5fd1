//! Commit-then-stream transfer protocol.
//!
//! A producer answers a request with a single reply header and only then
//! streams the payload as chunks. Once the header is out the request has
//! succeeded as far as the caller is concerned; a failure discovered later
//! can only be signalled by ending the stream cancelled.
//!
//! # Architecture
//!
//! ```text
//! +-----------------+                         +------------+
//! | ByteSource      | --> ByteRelayProducer --+            |
//! +-----------------+                         |  Transfer  |     +----------+     +---------+
//!                                             |  (state)   | --> | Channel  | --> | Receiver|
//! +-----------------+                         |            |     +----------+     +---------+
//! | WalkEngine      | --> RecordStreamProducer+            |                          |
//! +-----------------+                         +------------+                      decode()
//! ```
//!
//! Two payload modes share the state machine: raw bytes relayed verbatim,
//! and a stream of self-describing directory entry records (one per
//! chunk) that the consumer decodes after reassembly.

pub mod channel;
pub mod decoder;
pub mod generator;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod state;

pub use channel::{ChannelEvent, ChunkedTransferChannel, FramedChannel, MemoryChannel};
pub use decoder::{decode, DirentList, INITIAL_CAPACITY};
pub use generator::RecordStreamProducer;
pub use protocol::{
    encode_records, read_frame, write_frame, DirectoryEntryRecord, EndStatus, Frame, FrameKind,
    MAX_CHUNK_SIZE, MAX_FRAME_SIZE,
};
pub use receiver::{fetch_dirents, receive_to_writer, receive_transfer};
pub use sender::{ByteRelayProducer, RelayConfig};
pub use state::{Delivered, Outcome, Stream, Transfer, TransferState};

//! Record stream producer.
//!
//! Drives a walk engine and sends one encoded
//! [`DirectoryEntryRecord`](super::protocol::DirectoryEntryRecord) per
//! visited entry, one chunk each. The commit happens before the walk
//! starts, so any failure during the walk ends the transfer cancelled.

use crate::error::{Result, StreamError};
use crate::streaming::channel::ChunkedTransferChannel;
use crate::streaming::state::{Outcome, Stream, Transfer};
use crate::walk::{WalkControl, WalkEngine, WalkOpener};
use std::path::Path;

pub struct RecordStreamProducer<O: WalkOpener> {
    opener: O,
}

impl<O: WalkOpener> RecordStreamProducer<O> {
    pub fn new(opener: O) -> Self {
        Self { opener }
    }

    /// Open the engine at `root`, commit, and stream every entry.
    ///
    /// Returns `Err` only if the engine could not be opened or the commit
    /// header could not be sent.
    pub fn stream<C>(&self, channel: &mut C, root: &Path) -> Result<Outcome>
    where
        C: ChunkedTransferChannel + ?Sized,
    {
        let mut engine = self.opener.open(root)?;
        let stream = Transfer::new(channel).commit()?;
        Ok(stream.run(|stream| send_entries(stream, &mut engine)))
    }
}

fn send_entries<C, E>(
    stream: &mut Stream<'_, C>,
    engine: &mut E,
) -> std::result::Result<(), StreamError>
where
    C: ChunkedTransferChannel + ?Sized,
    E: WalkEngine,
{
    let mut failure = None;
    let walked = engine.walk(&mut |entry| {
        if entry.is_dot() {
            return WalkControl::Continue;
        }
        let sent = entry
            .to_record()
            .encode()
            .and_then(|chunk| stream.write_chunk(&chunk));
        match sent {
            Ok(()) => WalkControl::Continue,
            Err(e) => {
                failure = Some(e);
                WalkControl::Abort
            }
        }
    });

    // The visitor's own error explains an abort better than the engine's.
    if let Some(e) = failure {
        return Err(e);
    }
    walked.map_err(|e| StreamError::Walk(e.to_string()))
}

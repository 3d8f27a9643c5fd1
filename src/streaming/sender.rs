//! Byte relay producer.
//!
//! Forwards the output of a [`ByteSource`] verbatim, one chunk per
//! non-empty read. No framing is added: the receiver gets exactly the
//! source's bytes.

use crate::error::{Result, StreamError};
use crate::source::{ByteSource, ByteStream};
use crate::streaming::channel::ChunkedTransferChannel;
use crate::streaming::protocol::MAX_CHUNK_SIZE;
use crate::streaming::state::{Outcome, Stream, Transfer};
use std::io::{ErrorKind, Read};

/// Relay configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayConfig {
    /// Log the source description before starting it.
    pub verbose: bool,
}

pub struct ByteRelayProducer {
    config: RelayConfig,
}

impl ByteRelayProducer {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Start `source`, commit, and stream it to `channel`.
    ///
    /// Returns `Err` only if the source could not be started or the commit
    /// header could not be sent; the channel has then seen nothing.
    pub fn relay<C, S>(&self, channel: &mut C, source: S) -> Result<Outcome>
    where
        C: ChunkedTransferChannel + ?Sized,
        S: ByteSource,
    {
        if self.config.verbose {
            tracing::info!("{}", source.describe());
        }

        let reader = source.open()?;
        let stream = Transfer::new(channel).commit()?;
        Ok(stream.run(|stream| pump(stream, reader)))
    }
}

fn pump<C, R>(stream: &mut Stream<'_, C>, mut reader: R) -> std::result::Result<(), StreamError>
where
    C: ChunkedTransferChannel + ?Sized,
    R: ByteStream,
{
    let mut buf = vec![0u8; MAX_CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(StreamError::Read(e)),
        };
        stream.write_chunk(&buf[..n])?;
    }
    reader.close().map_err(StreamError::Close)
}

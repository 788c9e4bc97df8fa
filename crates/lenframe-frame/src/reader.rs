use std::io::{ErrorKind, Read};
use std::time::Duration;

use lenframe_transport::NetStream;

use crate::codec::FrameConfig;
use crate::error::{FrameError, Result};
use crate::reassembly::{Reassembly, ReassemblyStats};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete messages from any `Read` stream.
///
/// Handles partial reads, coalesced frames and desync internally; callers
/// always get whole messages, in wire order.
pub struct FrameReader<T> {
    inner: T,
    reassembly: Reassembly,
    chunk: Box<[u8]>,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader without a partial-frame deadline.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, &FrameConfig::default(), None)
    }

    /// Create a new frame reader with explicit limits and deadline.
    pub fn with_config(inner: T, config: &FrameConfig, frame_timeout: Option<Duration>) -> Self {
        Self {
            inner,
            reassembly: Reassembly::with_config(config, frame_timeout),
            chunk: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
        }
    }

    /// Read until at least one message completes (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    /// Read timeouts surface as `FrameError::Io` with `WouldBlock` or
    /// `TimedOut` (see [`FrameError::is_timeout`]) after the partial-frame
    /// deadline has been checked, so callers can poll a stop flag.
    pub fn read_messages(&mut self) -> Result<Vec<String>> {
        loop {
            let read = match self.inner.read(&mut self.chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) {
                        self.reassembly.expire();
                    }
                    return Err(FrameError::Io(err));
                }
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            if let Some(messages) = self.reassembly.feed(&self.chunk[..read]) {
                return Ok(messages);
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Reassembly counters for this stream.
    pub fn stats(&self) -> ReassemblyStats {
        self.reassembly.stats()
    }
}

impl FrameReader<NetStream> {
    /// Create a frame reader for `NetStream` and apply read timeout from config.
    pub fn with_config_net(
        inner: NetStream,
        config: &FrameConfig,
        frame_timeout: Option<Duration>,
    ) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config, frame_timeout))
    }
}

pub(crate) fn transport_to_frame_error(err: lenframe_transport::TransportError) -> FrameError {
    match err {
        lenframe_transport::TransportError::Io(io)
        | lenframe_transport::TransportError::Accept(io) => FrameError::Io(io),
        lenframe_transport::TransportError::Bind { source, .. }
        | lenframe_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

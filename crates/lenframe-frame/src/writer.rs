use std::io::{Error, ErrorKind, Write};
use std::time::Instant;

use bytes::BytesMut;
use lenframe_transport::NetStream;

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and send one text message.
    pub fn send(&mut self, message: &str) -> Result<()> {
        self.buf.clear();
        encode_frame(message, &mut self.buf)?;
        if self.buf.len() > self.config.max_frame_len {
            return Err(FrameError::FrameTooLarge {
                size: self.buf.len(),
                max: self.config.max_frame_len,
            });
        }

        let frame = std::mem::take(&mut self.buf);
        let result = self.write_encoded(&frame);
        self.buf = frame;
        result
    }

    /// Write an already encoded frame (e.g. one shared across a broadcast).
    ///
    /// With a `write_timeout` configured, the whole frame must go out within
    /// that time. The deadline is checked between partial writes, so a single
    /// blocked `write` call can overrun it by at most its own timeout.
    pub fn write_encoded(&mut self, frame: &[u8]) -> Result<()> {
        let deadline = self
            .config
            .write_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let mut offset = 0usize;
        while offset < frame.len() {
            match self.inner.write(&frame[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
            if offset < frame.len() && deadline.is_some_and(|at| Instant::now() >= at) {
                return Err(FrameError::Io(Error::new(
                    ErrorKind::TimedOut,
                    format!("frame write stalled after {offset} of {} bytes", frame.len()),
                )));
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
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

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<NetStream> {
    /// Create a frame writer for `NetStream` and apply write timeout from config.
    pub fn with_config_net(inner: NetStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

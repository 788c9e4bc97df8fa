//! Per-connection reassembly of frames from arbitrary read chunks.
//!
//! The buffer is non-empty only while a frame is partially received. It is
//! cleared when frames complete, when an abandonment deadline passes, or when
//! the bytes at a frame boundary do not look like a header (desync). None of
//! these conditions terminate the connection.

use std::time::{Duration, Instant};

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::codec::{begins_with_header, extract_frames, FrameConfig, HEADER_LEN};
use crate::error::FrameError;

/// Default wait before a stalled partial frame is abandoned.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Counters describing what a [`Reassembly`] has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Messages produced.
    pub messages: u64,
    /// Chunks or leftovers dropped because they did not start a frame.
    pub desyncs: u64,
    /// Partial frames abandoned after the deadline.
    pub timeouts: u64,
}

/// Reassembly state for one connection.
#[derive(Debug)]
pub struct Reassembly {
    buf: BytesMut,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
    max_frame_len: usize,
    stats: ReassemblyStats,
}

impl Default for Reassembly {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembly {
    /// Reassembly without an abandonment deadline.
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default(), None)
    }

    /// Reassembly that abandons a partial frame after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_config(&FrameConfig::default(), Some(timeout))
    }

    /// Reassembly with explicit frame limits and optional deadline.
    pub fn with_config(config: &FrameConfig, timeout: Option<Duration>) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            deadline: None,
            timeout,
            max_frame_len: config.max_frame_len,
            stats: ReassemblyStats::default(),
        }
    }

    /// Feed freshly received bytes.
    ///
    /// Returns `Some(messages)` when at least one frame completed, in wire
    /// order, and `None` while still accumulating (or after discarding).
    pub fn feed(&mut self, bytes: &[u8]) -> Option<Vec<String>> {
        self.feed_at(bytes, Instant::now())
    }

    /// [`Reassembly::feed`] with an explicit clock reading.
    pub fn feed_at(&mut self, bytes: &[u8], now: Instant) -> Option<Vec<String>> {
        self.expire_at(now);

        if bytes.is_empty() {
            return None;
        }

        if self.buf.is_empty() {
            if !begins_with_header(bytes) {
                self.stats.desyncs += 1;
                debug!(len = bytes.len(), "discarding bytes that do not start a frame");
                return None;
            }
            self.start_deadline(now);
        }

        self.buf.extend_from_slice(bytes);
        if self.buf.len() <= HEADER_LEN {
            return None;
        }

        let extracted = match extract_frames(&self.buf, self.max_frame_len) {
            Ok(extracted) => extracted,
            Err(err) => {
                warn!(error = %err, len = self.buf.len(), "dropping reassembly buffer");
                self.stats.desyncs += 1;
                self.reset();
                return None;
            }
        };

        if extracted.messages.is_empty() {
            return None;
        }

        let messages = extracted.messages;
        let leftover = extracted.leftover.map(<[u8]>::to_vec);
        self.buf.clear();

        match leftover {
            None => self.deadline = None,
            Some(rest) if begins_with_header(&rest) => {
                self.buf.extend_from_slice(&rest);
                self.start_deadline(now);
            }
            Some(rest) => {
                let err = FrameError::ProtocolDesync(format!(
                    "{} trailing bytes do not start a frame",
                    rest.len()
                ));
                warn!(error = %err, "dropping leftover");
                self.stats.desyncs += 1;
                self.deadline = None;
            }
        }

        self.stats.messages += messages.len() as u64;
        Some(messages)
    }

    /// Abandon the partial frame if its deadline has passed.
    ///
    /// Returns true if bytes were dropped.
    pub fn expire(&mut self) -> bool {
        self.expire_at(Instant::now())
    }

    /// [`Reassembly::expire`] with an explicit clock reading.
    pub fn expire_at(&mut self, now: Instant) -> bool {
        match (self.deadline, self.timeout) {
            (Some(deadline), Some(timeout)) if now >= deadline => {
                let err = FrameError::FrameTimeout(timeout);
                debug!(error = %err, pending = self.buf.len(), "abandoning partial frame");
                self.stats.timeouts += 1;
                self.reset();
                true
            }
            _ => false,
        }
    }

    /// Drop any partial frame and cancel the deadline.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.deadline = None;
    }

    /// Number of buffered bytes belonging to an incomplete frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// True when no partial frame is buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Deadline of the partial frame, if one is being timed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Running frame counters.
    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    fn start_deadline(&mut self, now: Instant) {
        self.deadline = self.timeout.map(|timeout| now + timeout);
    }
}

use std::time::Duration;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The caller passed a value that can never be framed (e.g. empty text).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Bytes at a frame boundary are not a valid frame header.
    #[error("protocol desync: {0}")]
    ProtocolDesync(String),

    /// The frame exceeds the configured maximum length.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A partially received frame was not completed before its deadline.
    #[error("partial frame abandoned after {0:?}")]
    FrameTimeout(Duration),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True for read/write timeouts, which only mean "nothing happened yet".
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Io(err) if matches!(
                err.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;

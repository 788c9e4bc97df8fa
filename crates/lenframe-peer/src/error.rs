use std::net::SocketAddr;

/// Errors that can occur in client supervisor and server registry operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] lenframe_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] lenframe_frame::FrameError),

    /// The caller passed a value that can never be sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// `send` was called while no connection is established.
    #[error("not connected to {0}")]
    NotConnected(SocketAddr),

    /// A registry for a different endpoint is still active.
    #[error("registry already active on {active}, cannot bind {requested}")]
    EndpointInUse { active: String, requested: String },

    /// The supervisor or registry has been stopped.
    #[error("already stopped")]
    Stopped,
}

impl PeerError {
    /// Lift frame-level argument errors to [`PeerError::InvalidArgument`].
    pub(crate) fn from_frame(err: lenframe_frame::FrameError) -> Self {
        match err {
            lenframe_frame::FrameError::InvalidArgument(reason) => Self::InvalidArgument(reason),
            other => Self::Frame(other),
        }
    }

    /// Human-readable reason, suitable for status events.
    pub fn reason(&self) -> String {
        match self {
            Self::Transport(err) => err.reason(),
            Self::Frame(lenframe_frame::FrameError::Io(err)) => io_reason(err),
            Self::Frame(lenframe_frame::FrameError::ConnectionClosed) => {
                "connection closed by peer".to_string()
            }
            other => other.to_string(),
        }
    }
}

fn io_reason(err: &std::io::Error) -> String {
    match err.raw_os_error() {
        Some(code) => format!("Code:{code} {err}"),
        None => err.to_string(),
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;

#[cfg(test)]
mod tests {
    use lenframe_frame::FrameError;

    use super::*;

    #[test]
    fn invalid_argument_is_lifted() {
        let err = PeerError::from_frame(FrameError::InvalidArgument("message must not be empty"));
        assert!(matches!(err, PeerError::InvalidArgument(_)));
    }

    #[test]
    fn reason_carries_os_code() {
        let io = std::io::Error::from_raw_os_error(104);
        let reason = PeerError::Frame(FrameError::Io(io)).reason();
        assert!(reason.starts_with("Code:104 "), "unexpected {reason}");
    }

    #[test]
    fn closed_reason_is_readable() {
        let reason = PeerError::Frame(FrameError::ConnectionClosed).reason();
        assert_eq!(reason, "connection closed by peer");
    }
}

use std::net::SocketAddr;
use std::time::Duration;

/// Errors that can occur in TCP transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The connect attempt did not complete within the allowed wait.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    /// The address could not be resolved to a socket address.
    #[error("failed to resolve address {addr}: {reason}")]
    Resolve { addr: String, reason: String },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Human-readable reason, suitable for status events.
    pub fn reason(&self) -> String {
        match self {
            Self::Connect { source, .. } | Self::Accept(source) | Self::Io(source) => {
                match source.raw_os_error() {
                    Some(code) => format!("Code:{code} {source}"),
                    None => source.to_string(),
                }
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

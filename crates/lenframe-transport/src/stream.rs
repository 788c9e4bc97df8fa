use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use tracing::debug;

use crate::error::Result;
use crate::probe::{probe_stream, Liveness, ProbeMode};

/// A connected TCP stream implementing `Read + Write`.
///
/// This is the fundamental I/O type returned by transport operations.
/// Clones made with [`NetStream::try_clone`] share the same socket, so one
/// clone can be read on a receive thread while another is used for writing
/// or for [`NetStream::shutdown`].
pub struct NetStream {
    inner: TcpStream,
    peer: SocketAddr,
}

impl Read for NetStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for NetStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl NetStream {
    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        Ok(Self {
            inner: stream,
            peer,
        })
    }

    /// Remote address of the connected peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Local address of this end of the connection.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Into::into)
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            inner: self.inner.try_clone()?,
            peer: self.peer,
        })
    }

    /// Shut down both directions of the connection.
    ///
    /// Any thread blocked reading a clone of this stream wakes up with
    /// end-of-stream. Shutting down an already closed socket is not an error.
    pub fn shutdown(&self) -> Result<()> {
        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => {
                debug!(peer = %self.peer, "stream shut down");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Half-close: further writes fail, reads keep working and the peer
    /// sees end-of-stream.
    pub fn shutdown_write(&self) -> Result<()> {
        match self.inner.shutdown(Shutdown::Write) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Check whether the connection is still usable without blocking.
    pub fn probe(&self, mode: ProbeMode) -> Liveness {
        probe_stream(&self.inner, mode)
    }
}

impl std::fmt::Debug for NetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetStream")
            .field("peer", &self.peer)
            .finish()
    }
}

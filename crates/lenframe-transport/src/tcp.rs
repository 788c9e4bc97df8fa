use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::NetStream;

/// TCP listening endpoint.
///
/// Provides bind/accept on a local address and a bounded-wait connect for
/// clients. The listener is non-blocking so an accept loop can observe a
/// stop request between attempts; accepted streams are always blocking.
pub struct TcpEndpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpEndpoint {
    /// Bind and listen on `addr` (e.g. `"127.0.0.1:11000"`).
    pub fn bind(addr: &str) -> Result<Self> {
        let target = resolve(addr)?;
        let listener = TcpListener::bind(target).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|e| TransportError::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Try to accept one pending connection.
    ///
    /// Returns `Ok(None)` when no connection is waiting.
    pub fn try_accept(&self) -> Result<Option<NetStream>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false).map_err(TransportError::Accept)?;
                debug!(%peer, "accepted connection");
                Ok(Some(NetStream::from_tcp(stream)?))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// Connect to a listening endpoint, waiting at most `timeout`.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<NetStream> {
        let stream = match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => stream,
            Err(err) if err.kind() == ErrorKind::TimedOut => {
                return Err(TransportError::ConnectTimeout { addr, timeout });
            }
            Err(err) => return Err(TransportError::Connect { addr, source: err }),
        };
        debug!(%addr, "connected to tcp endpoint");
        NetStream::from_tcp(stream)
    }

    /// The address this endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

/// Resolve `addr` to the first matching socket address.
pub fn resolve(addr: &str) -> Result<SocketAddr> {
    let mut addrs = addr.to_socket_addrs().map_err(|e| TransportError::Resolve {
        addr: addr.to_string(),
        reason: e.to_string(),
    })?;
    addrs.next().ok_or_else(|| TransportError::Resolve {
        addr: addr.to_string(),
        reason: "no addresses found".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::time::Instant;

    fn accept_within(endpoint: &TcpEndpoint, wait: Duration) -> NetStream {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(stream) = endpoint.try_accept().unwrap() {
                return stream;
            }
            assert!(Instant::now() < deadline, "no connection accepted");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_bind_accept_connect() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let addr = endpoint.local_addr();
        assert_ne!(addr.port(), 0);

        let handle = std::thread::spawn(move || {
            let mut client = TcpEndpoint::connect(addr, Duration::from_secs(2)).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let mut server = accept_within(&endpoint, Duration::from_secs(2));
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_try_accept_without_pending_connection() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        assert!(endpoint.try_accept().unwrap().is_none());
    }

    #[test]
    fn test_bind_twice_fails() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let addr = endpoint.local_addr().to_string();
        let result = TcpEndpoint::bind(&addr);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }

    #[test]
    fn test_connect_refused() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let addr = endpoint.local_addr();
        drop(endpoint);

        let result = TcpEndpoint::connect(addr, Duration::from_secs(1));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_resolve_rejects_garbage() {
        let result = resolve("not an address");
        assert!(matches!(result, Err(TransportError::Resolve { .. })));
    }

    #[test]
    fn test_accepted_stream_reports_peer() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let client = TcpEndpoint::connect(endpoint.local_addr(), Duration::from_secs(2)).unwrap();
        let server = accept_within(&endpoint, Duration::from_secs(2));

        assert_eq!(server.peer_addr(), client.local_addr().unwrap());
        assert_eq!(endpoint.transport_name(), "tcp");
    }

    #[test]
    fn test_shutdown_write_keeps_read_half() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").unwrap();
        let mut client = TcpEndpoint::connect(endpoint.local_addr(), Duration::from_secs(2)).unwrap();
        let mut server = accept_within(&endpoint, Duration::from_secs(2));

        client.write_all(b"bye").unwrap();
        client.shutdown_write().unwrap();
        assert!(client.write_all(b"more").is_err());

        let mut received = Vec::new();
        server.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"bye");

        server.write_all(b"ack").unwrap();
        let mut buf = [0u8; 3];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ack");
    }
}

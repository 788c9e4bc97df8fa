//! Non-blocking liveness probing.
//!
//! A probe answers "can this connection still carry data?" without waiting
//! and without injecting anything into the framed byte stream (unless the
//! legacy [`ProbeMode::Heartbeat`] mode is selected).

use std::io;
use std::net::TcpStream;

/// Raw, unframed payload written by [`ProbeMode::Heartbeat`].
pub const HEARTBEAT: &[u8] = b"Heartbeat";

/// How a liveness probe touches the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMode {
    /// Poll for writability and errors, then issue a zero-length send.
    #[default]
    ZeroByte,
    /// Poll, then write the raw `Heartbeat` bytes without blocking.
    ///
    /// Receivers discard the bytes because they do not start with a frame
    /// header, but they can corrupt a frame the peer is still assembling.
    Heartbeat,
}

/// Outcome of a liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    /// The socket accepted the probe (or would have, given buffer space).
    Alive(&'static str),
    /// The socket reported an error or hang-up.
    Dead(String),
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive(_))
    }

    /// Human-readable reason, suitable for status events.
    pub fn reason(&self) -> String {
        match self {
            Self::Alive(reason) => (*reason).to_string(),
            Self::Dead(reason) => reason.clone(),
        }
    }
}

fn payload_for(mode: ProbeMode) -> &'static [u8] {
    match mode {
        ProbeMode::ZeroByte => &[],
        ProbeMode::Heartbeat => HEARTBEAT,
    }
}

fn error_reason(err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(code) => format!("Code:{code} {err}"),
        None => err.to_string(),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL;
#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT;

#[cfg(unix)]
pub(crate) fn probe_stream(stream: &TcpStream, mode: ProbeMode) -> Liveness {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };

    // SAFETY: `pfd` is a valid, writable pollfd array of length 1 and `fd` is
    // an open socket descriptor owned by `stream` for the duration of the call.
    let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
    if rc < 0 {
        return Liveness::Dead(error_reason(&io::Error::last_os_error()));
    }

    if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        let reason = match stream.take_error() {
            Ok(Some(err)) => error_reason(&err),
            _ => "connection hung up".to_string(),
        };
        return Liveness::Dead(reason);
    }

    let payload = payload_for(mode);
    // SAFETY: `payload` is a valid readable buffer of `payload.len()` bytes
    // (possibly zero) and `fd` is an open socket descriptor.
    let sent = unsafe {
        libc::send(
            fd,
            payload.as_ptr().cast::<libc::c_void>(),
            payload.len(),
            SEND_FLAGS,
        )
    };

    if sent >= 0 {
        return Liveness::Alive("connection alive");
    }

    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        Liveness::Alive("connection alive (send would block)")
    } else {
        Liveness::Dead(error_reason(&err))
    }
}

#[cfg(not(unix))]
pub(crate) fn probe_stream(stream: &TcpStream, mode: ProbeMode) -> Liveness {
    use std::io::Write;

    if let Ok(Some(err)) = stream.take_error() {
        return Liveness::Dead(error_reason(&err));
    }

    if let Err(err) = stream.set_nonblocking(true) {
        return Liveness::Dead(error_reason(&err));
    }
    let mut writer = stream;
    let result = writer.write(payload_for(mode));
    let _ = stream.set_nonblocking(false);

    match result {
        Ok(_) => Liveness::Alive("connection alive"),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            Liveness::Alive("connection alive (send would block)")
        }
        Err(err) => Liveness::Dead(error_reason(&err)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::Duration;

    use super::*;
    use crate::stream::NetStream;

    fn connected_pair() -> (NetStream, NetStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (
            NetStream::from_tcp(client).unwrap(),
            NetStream::from_tcp(server).unwrap(),
        )
    }

    #[test]
    fn zero_byte_probe_on_open_connection_is_alive() {
        let (client, mut server) = connected_pair();

        assert!(client.probe(ProbeMode::ZeroByte).is_alive());

        server
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let mut buf = [0u8; 16];
        let err = server.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn heartbeat_probe_writes_raw_bytes() {
        let (client, mut server) = connected_pair();

        assert!(client.probe(ProbeMode::Heartbeat).is_alive());

        let mut buf = [0u8; 9];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, HEARTBEAT);
    }

    #[test]
    fn probe_after_local_shutdown_is_dead() {
        let (client, _server) = connected_pair();
        client.shutdown().unwrap();

        let liveness = client.probe(ProbeMode::ZeroByte);
        assert!(!liveness.is_alive(), "unexpected {liveness:?}");
    }

    #[test]
    fn liveness_reason_text() {
        assert_eq!(Liveness::Alive("ok").reason(), "ok");
        assert_eq!(Liveness::Dead("gone".to_string()).reason(), "gone");
    }
}

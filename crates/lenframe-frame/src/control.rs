//! Well-known payloads.
//!
//! These travel as ordinary frames but are interpreted by the receiving side
//! rather than delivered as application data.

/// Payload a client sends before closing so the server can drop it at once.
pub const CLOSE_SOCKET: &str = "CloseSocket";

/// Returns true if `message` is the close-frame payload (ASCII case-insensitive).
pub fn is_close_frame(message: &str) -> bool {
    message.eq_ignore_ascii_case(CLOSE_SOCKET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frame_matches_ignoring_case() {
        assert!(is_close_frame("CloseSocket"));
        assert!(is_close_frame("closesocket"));
        assert!(is_close_frame("CLOSESOCKET"));
    }

    #[test]
    fn ordinary_payloads_are_not_close_frames() {
        assert!(!is_close_frame("CloseSocket "));
        assert!(!is_close_frame("Close"));
        assert!(!is_close_frame(""));
    }
}

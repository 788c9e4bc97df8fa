use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: tag (4) + zero-padded decimal length (10) = 14 bytes.
pub const HEADER_LEN: usize = 14;

/// Header tag: "LEN=".
pub const HEADER_TAG: &[u8; 4] = b"LEN=";

/// Width of the decimal length field.
pub const LENGTH_DIGITS: usize = HEADER_LEN - HEADER_TAG.len();

/// Largest total length the 10-digit field can express.
pub const MAX_ENCODABLE_LEN: u64 = 9_999_999_999;

/// Default maximum accepted frame length (header included): 16 MiB.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encode a text message into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────────────────┬─────────────────────┐
/// │ Tag (4B) │ Length (10B, ASCII)  │ Payload (UTF-8)     │
/// │ "LEN="   │ header + payload,    │ (Length - 14 bytes) │
/// │          │ zero-padded decimal  │                     │
/// └──────────┴──────────────────────┴─────────────────────┘
/// ```
pub fn encode_frame(message: &str, dst: &mut BytesMut) -> Result<()> {
    if message.is_empty() {
        return Err(FrameError::InvalidArgument("message must not be empty"));
    }

    let total = HEADER_LEN + message.len();
    if total as u64 > MAX_ENCODABLE_LEN {
        return Err(FrameError::FrameTooLarge {
            size: total,
            max: MAX_ENCODABLE_LEN as usize,
        });
    }

    dst.reserve(total);
    dst.put_slice(HEADER_TAG);
    dst.put_slice(format!("{total:0width$}", width = LENGTH_DIGITS).as_bytes());
    dst.put_slice(message.as_bytes());
    Ok(())
}

/// Encode a text message into a freshly allocated frame.
pub fn encode(message: &str) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(HEADER_LEN + message.len());
    encode_frame(message, &mut dst)?;
    Ok(dst.freeze())
}

/// Returns true if `bytes` could be the start of a frame.
///
/// Compares the first `min(4, len)` bytes against `LEN=`, ignoring ASCII
/// case, so a read that delivers only part of the tag still qualifies.
pub fn begins_with_header(bytes: &[u8]) -> bool {
    let n = bytes.len().min(HEADER_TAG.len());
    bytes[..n].eq_ignore_ascii_case(&HEADER_TAG[..n])
}

/// Parse the total frame length from a complete 14-byte header.
pub fn parse_frame_len(header: &[u8]) -> Result<usize> {
    if header.len() < HEADER_LEN {
        return Err(FrameError::ProtocolDesync(format!(
            "header needs {HEADER_LEN} bytes, got {}",
            header.len()
        )));
    }

    let (tag, digits) = header[..HEADER_LEN].split_at(HEADER_TAG.len());
    if !tag.eq_ignore_ascii_case(HEADER_TAG) {
        return Err(FrameError::ProtocolDesync(format!(
            "bad header tag {:?}",
            String::from_utf8_lossy(tag)
        )));
    }
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(FrameError::ProtocolDesync(format!(
            "non-numeric length field {:?}",
            String::from_utf8_lossy(digits)
        )));
    }

    let total = digits
        .iter()
        .fold(0u64, |acc, digit| acc * 10 + u64::from(digit - b'0'));
    if total < HEADER_LEN as u64 {
        return Err(FrameError::ProtocolDesync(format!(
            "frame length {total} shorter than header"
        )));
    }

    usize::try_from(total).map_err(|_| FrameError::FrameTooLarge {
        size: usize::MAX,
        max: usize::MAX,
    })
}

/// Result of [`extract_frames`].
#[derive(Debug, PartialEq, Eq)]
pub struct Extracted<'a> {
    /// Complete messages, in wire order.
    pub messages: Vec<String>,
    /// Unconsumed trailing bytes; `None` when the input was consumed exactly.
    pub leftover: Option<&'a [u8]>,
}

/// Extract every complete frame from the front of `bytes`.
///
/// A malformed header at the very start is an error. A malformed header
/// after at least one good frame ends extraction and is handed back as
/// leftover, so the caller's boundary check decides what to do with it.
pub fn extract_frames(bytes: &[u8], max_frame_len: usize) -> Result<Extracted<'_>> {
    let mut messages = Vec::new();
    let mut offset = 0usize;

    loop {
        let rest = &bytes[offset..];
        if rest.is_empty() {
            return Ok(Extracted {
                messages,
                leftover: None,
            });
        }
        if rest.len() < HEADER_LEN {
            return Ok(Extracted {
                messages,
                leftover: Some(rest),
            });
        }

        let frame_len = match checked_frame_len(rest, max_frame_len) {
            Ok(len) => len,
            Err(err) if messages.is_empty() => return Err(err),
            Err(_) => {
                return Ok(Extracted {
                    messages,
                    leftover: Some(rest),
                })
            }
        };

        if rest.len() < frame_len {
            return Ok(Extracted {
                messages,
                leftover: Some(rest),
            });
        }

        messages.push(String::from_utf8_lossy(&rest[HEADER_LEN..frame_len]).into_owned());
        offset += frame_len;
    }
}

fn checked_frame_len(bytes: &[u8], max_frame_len: usize) -> Result<usize> {
    let frame_len = parse_frame_len(bytes)?;
    if frame_len > max_frame_len {
        return Err(FrameError::FrameTooLarge {
            size: frame_len,
            max: max_frame_len,
        });
    }
    Ok(frame_len)
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum frame size in bytes, header included. Default: 16 MiB.
    pub max_frame_len: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations, also applied to each whole frame.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_header() {
        let frame = encode("hi").unwrap();
        assert_eq!(frame.as_ref(), b"LEN=0000000016hi");
    }

    #[test]
    fn test_encode_counts_utf8_bytes() {
        let frame = encode("héllo").unwrap();
        assert_eq!(&frame[..HEADER_LEN], b"LEN=0000000020");
        assert_eq!(frame.len(), 20);
    }

    #[test]
    fn test_encode_rejects_empty() {
        let result = encode("");
        assert!(matches!(result, Err(FrameError::InvalidArgument(_))));
    }

    #[test]
    fn test_encode_extract_roundtrip() {
        for message in ["x", "hello, lenframe!", "多字节文本", "line\nbreak"] {
            let frame = encode(message).unwrap();
            let extracted = extract_frames(&frame, DEFAULT_MAX_FRAME_LEN).unwrap();
            assert_eq!(extracted.messages, vec![message.to_string()]);
            assert_eq!(extracted.leftover, None);
        }
    }

    #[test]
    fn test_extract_incomplete_header() {
        let bytes = b"LEN=0000";
        let extracted = extract_frames(bytes, DEFAULT_MAX_FRAME_LEN).unwrap();
        assert!(extracted.messages.is_empty());
        assert_eq!(extracted.leftover, Some(&bytes[..]));
    }

    #[test]
    fn test_extract_incomplete_payload() {
        let frame = encode("hello").unwrap();
        let partial = &frame[..HEADER_LEN + 2];

        let extracted = extract_frames(partial, DEFAULT_MAX_FRAME_LEN).unwrap();
        assert!(extracted.messages.is_empty());
        assert_eq!(extracted.leftover, Some(partial));
    }

    #[test]
    fn test_extract_multiple_frames_with_partial_tail() {
        let mut buf = BytesMut::new();
        encode_frame("first", &mut buf).unwrap();
        encode_frame("second", &mut buf).unwrap();
        let third = encode("third").unwrap();
        buf.extend_from_slice(&third[..7]);

        let extracted = extract_frames(&buf, DEFAULT_MAX_FRAME_LEN).unwrap();
        assert_eq!(extracted.messages, vec!["first", "second"]);
        assert_eq!(extracted.leftover, Some(&third[..7]));
    }

    #[test]
    fn test_extract_empty_input() {
        let extracted = extract_frames(b"", DEFAULT_MAX_FRAME_LEN).unwrap();
        assert!(extracted.messages.is_empty());
        assert_eq!(extracted.leftover, None);
    }

    #[test]
    fn test_extract_non_numeric_length_is_desync() {
        let result = extract_frames(b"LEN=00000x0016hi", DEFAULT_MAX_FRAME_LEN);
        assert!(matches!(result, Err(FrameError::ProtocolDesync(_))));
    }

    #[test]
    fn test_extract_length_shorter_than_header_is_desync() {
        let result = extract_frames(b"LEN=0000000003abc", DEFAULT_MAX_FRAME_LEN);
        assert!(matches!(result, Err(FrameError::ProtocolDesync(_))));
    }

    #[test]
    fn test_extract_frame_too_large() {
        let result = extract_frames(b"LEN=0000001000xxxx", 64);
        assert!(matches!(
            result,
            Err(FrameError::FrameTooLarge { size: 1000, max: 64 })
        ));
    }

    #[test]
    fn test_extract_bad_header_after_good_frame_becomes_leftover() {
        let mut buf = BytesMut::new();
        encode_frame("ok", &mut buf).unwrap();
        buf.extend_from_slice(b"garbage-bytes-here");

        let extracted = extract_frames(&buf, DEFAULT_MAX_FRAME_LEN).unwrap();
        assert_eq!(extracted.messages, vec!["ok"]);
        assert_eq!(extracted.leftover, Some(&b"garbage-bytes-here"[..]));
    }

    #[test]
    fn test_extract_accepts_lowercase_tag() {
        let extracted = extract_frames(b"len=0000000016hi", DEFAULT_MAX_FRAME_LEN).unwrap();
        assert_eq!(extracted.messages, vec!["hi"]);
    }

    #[test]
    fn test_extract_invalid_utf8_is_lossy() {
        let mut bytes = b"LEN=0000000016".to_vec();
        bytes.extend_from_slice(&[0xFF, b'a']);

        let extracted = extract_frames(&bytes, DEFAULT_MAX_FRAME_LEN).unwrap();
        assert_eq!(extracted.messages, vec!["\u{FFFD}a"]);
    }

    #[test]
    fn test_begins_with_header() {
        assert!(begins_with_header(b"LEN=0000000016hi"));
        assert!(begins_with_header(b"len="));
        assert!(begins_with_header(b"LE"));
        assert!(begins_with_header(b""));
        assert!(!begins_with_header(b"Heartbeat"));
        assert!(!begins_with_header(b"X"));
    }

    #[test]
    fn test_parse_frame_len() {
        assert_eq!(parse_frame_len(b"LEN=0000000014").unwrap(), 14);
        assert_eq!(parse_frame_len(b"LEN=0000012345").unwrap(), 12345);
        assert!(parse_frame_len(b"LEN=12").is_err());
        assert!(parse_frame_len(b"SIZ=0000000014").is_err());
    }
}

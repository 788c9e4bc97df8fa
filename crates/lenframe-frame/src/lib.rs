//! Length-prefixed text framing for lenframe.
//!
//! Every message is framed with a fixed 14-byte ASCII header:
//! - The literal tag `LEN=`
//! - The total frame length (header + payload) as 10 zero-padded decimal digits
//!
//! followed by the UTF-8 payload. [`Reassembly`] turns arbitrary read chunks
//! back into whole messages, recovering locally from desync and stalled frames.

pub mod codec;
pub mod control;
pub mod error;
pub mod reader;
pub mod reassembly;
pub mod writer;

pub use codec::{
    begins_with_header, encode, encode_frame, extract_frames, parse_frame_len, Extracted,
    FrameConfig, DEFAULT_MAX_FRAME_LEN, HEADER_LEN, HEADER_TAG, LENGTH_DIGITS, MAX_ENCODABLE_LEN,
};
pub use control::{is_close_frame, CLOSE_SOCKET};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use reassembly::{Reassembly, ReassemblyStats, DEFAULT_FRAME_TIMEOUT};
pub use writer::FrameWriter;

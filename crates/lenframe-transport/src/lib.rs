//! TCP transport for lenframe.
//!
//! Provides the primitive socket capabilities the framing and peer layers
//! build on:
//! - Listening, accepting and connecting with a bounded wait
//! - A [`NetStream`] that implements `Read + Write` and can be shut down from
//!   another thread
//! - A non-blocking liveness probe that does not disturb the byte stream
//!
//! This is the lowest layer of lenframe. Everything else builds on top of
//! the [`NetStream`] type provided here.

pub mod error;
pub mod probe;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use probe::{Liveness, ProbeMode, HEARTBEAT};
pub use stream::NetStream;
pub use tcp::{resolve, TcpEndpoint};

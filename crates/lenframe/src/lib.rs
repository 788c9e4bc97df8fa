//! Length-prefixed text messaging over persistent TCP connections.
//!
//! Every message travels as a 14-byte `LEN=` header carrying the total frame
//! length, followed by the UTF-8 payload. On top of that framing lenframe
//! offers a client that keeps itself connected and a server that keeps one
//! connection per peer and broadcasts to all of them.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP streams, endpoints and the liveness probe
//! - [`frame`]: Wire codec, reassembly, frame reader and writer
//! - [`peer`]: Client supervisor and server registry (behind `peer` feature)
//!
//! # Example
//!
//! ```no_run
//! use lenframe::peer::{ClientEvent, ClientSupervisor};
//!
//! let client = ClientSupervisor::connect("127.0.0.1", 11000)?;
//! let events = client.subscribe();
//! for event in events.iter() {
//!     match event {
//!         ClientEvent::Status { connected: true, .. } => client.send("hello")?,
//!         ClientEvent::Message { text } => println!("{text}"),
//!         ClientEvent::Status { reason, .. } => eprintln!("{reason}"),
//!     }
//! }
//! # Ok::<(), lenframe::peer::PeerError>(())
//! ```

/// Re-export transport types.
pub mod transport {
    pub use lenframe_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use lenframe_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use lenframe_peer::*;
}

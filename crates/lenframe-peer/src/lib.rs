//! Connection lifecycle management for lenframe.
//!
//! This is the "just works" layer. A [`ClientSupervisor`] keeps one outbound
//! connection alive, probing and reconnecting in the background. A
//! [`ServerRegistry`] accepts peers, keeps at most one per identity, and
//! broadcasts to all of them. Both deliver what they receive as events on
//! plain `std::sync::mpsc` channels.

pub mod config;
pub mod error;
pub mod event;
mod listener;
pub mod peers;
pub mod registry;
pub mod supervisor;

pub use config::{
    ClientConfig, IdentityMode, RegistryConfig, DEFAULT_BROADCAST_CONCURRENCY,
    DEFAULT_CHECK_EVERY_TICKS, DEFAULT_CONNECT_TIMEOUT, DEFAULT_POLL_INTERVAL,
    DEFAULT_TICK_INTERVAL, DEFAULT_WRITE_TIMEOUT,
};
pub use error::{PeerError, Result};
pub use event::{ClientEvent, EvictReason, RegistryEvent};
pub use peers::PeerKey;
pub use registry::{BroadcastReport, RegistrySlot, ServerRegistry};
pub use supervisor::{ClientSupervisor, ConnectionStatus};

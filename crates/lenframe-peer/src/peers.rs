use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lenframe_frame::FrameWriter;
use lenframe_transport::NetStream;
use tracing::debug;

use crate::config::IdentityMode;
use crate::error::{PeerError, Result};

/// Identity of a peer in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerKey {
    Address(IpAddr),
    Endpoint(SocketAddr),
}

impl PeerKey {
    pub fn resolve(addr: SocketAddr, mode: IdentityMode) -> Self {
        match mode {
            IdentityMode::Address => Self::Address(addr.ip()),
            IdentityMode::AddressAndPort => Self::Endpoint(addr),
        }
    }
}

impl std::fmt::Display for PeerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address(ip) => write!(f, "{ip}"),
            Self::Endpoint(addr) => write!(f, "{addr}"),
        }
    }
}

/// One admitted connection.
pub(crate) struct PeerEntry {
    id: u64,
    key: PeerKey,
    addr: SocketAddr,
    writer: Mutex<FrameWriter<NetStream>>,
    control: NetStream,
}

impl PeerEntry {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn key(&self) -> PeerKey {
        self.key
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Write a pre-encoded frame; concurrent writers to one peer are serialized.
    pub(crate) fn send_encoded(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_encoded(frame).map_err(PeerError::from)
    }

    /// Shut the transport down; the peer's receive loop wakes with end-of-stream.
    pub(crate) fn close(&self) {
        if let Err(err) = self.control.shutdown() {
            debug!(peer = %self.addr, error = %err, "peer shutdown failed");
        }
    }

    #[cfg(test)]
    pub(crate) fn control(&self) -> &NetStream {
        &self.control
    }
}

/// The live-peer set, keyed by identity.
///
/// Every entry carries a unique id so a receive loop that lost its slot to a
/// reconnect can never remove the replacement.
pub(crate) struct PeerSet {
    inner: Mutex<HashMap<PeerKey, Arc<PeerEntry>>>,
    next_id: AtomicU64,
}

impl PeerSet {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PeerKey, Arc<PeerEntry>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build an entry for `writer` without admitting it yet.
    pub(crate) fn prepare(
        &self,
        key: PeerKey,
        writer: FrameWriter<NetStream>,
        control: NetStream,
    ) -> Arc<PeerEntry> {
        Arc::new(PeerEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            key,
            addr: control.peer_addr(),
            writer: Mutex::new(writer),
            control,
        })
    }

    /// Insert `entry`, returning the peer it displaced (if any).
    ///
    /// The displaced peer is closed before the lock is released.
    pub(crate) fn admit(&self, entry: Arc<PeerEntry>) -> Option<Arc<PeerEntry>> {
        let mut peers = self.lock();
        let previous = peers.insert(entry.key, entry);
        if let Some(previous) = &previous {
            previous.close();
        }
        previous
    }

    /// Remove the entry for `key` only if it is still the one with `id`.
    pub(crate) fn remove_if(&self, key: PeerKey, id: u64) -> Option<Arc<PeerEntry>> {
        let mut peers = self.lock();
        match peers.get(&key) {
            Some(entry) if entry.id == id => peers.remove(&key),
            _ => None,
        }
    }

    pub(crate) fn is_live(&self, key: PeerKey, id: u64) -> bool {
        self.lock().get(&key).is_some_and(|entry| entry.id == id)
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<PeerEntry>> {
        self.lock().values().cloned().collect()
    }

    pub(crate) fn drain(&self) -> Vec<Arc<PeerEntry>> {
        self.lock().drain().map(|(_, entry)| entry).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn addrs(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = self.lock().values().map(|entry| entry.addr).collect();
        addrs.sort();
        addrs
    }
}

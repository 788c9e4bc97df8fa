use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lenframe_frame::{is_close_frame, FrameConfig, FrameError, FrameReader, FrameWriter};
use lenframe_transport::{NetStream, TcpEndpoint};
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::{PeerError, Result};
use crate::event::{EvictReason, RegistryEvent, Subscribers};
use crate::peers::{PeerEntry, PeerKey, PeerSet};

/// Sleep between accept attempts when no connection is pending.
const ACCEPT_IDLE: Duration = Duration::from_millis(10);

/// State shared by the accept loop, peer threads and the registry handle.
pub(crate) struct RegistryShared {
    pub(crate) config: RegistryConfig,
    pub(crate) peers: PeerSet,
    pub(crate) subscribers: Subscribers<RegistryEvent>,
    stopping: AtomicBool,
}

impl RegistryShared {
    pub(crate) fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            peers: PeerSet::new(),
            subscribers: Subscribers::new(),
            stopping: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Mark the registry as stopping; returns false if it already was.
    pub(crate) fn begin_stop(&self) -> bool {
        !self.stopping.swap(true, Ordering::AcqRel)
    }

    /// Remove `peer` from the live set and close it.
    ///
    /// Only the caller that actually removed the entry publishes the event,
    /// so each peer is evicted at most once.
    pub(crate) fn evict(&self, peer: &PeerEntry, reason: EvictReason) -> bool {
        if self.peers.remove_if(peer.key(), peer.id()).is_none() {
            return false;
        }
        peer.close();
        info!(peer = %peer.addr(), %reason, "peer evicted");
        self.subscribers.publish(RegistryEvent::PeerEvicted {
            addr: peer.addr(),
            reason,
        });
        true
    }
}

/// Accept connections one at a time until the registry stops.
///
/// Each accepted socket is handed to its own thread, which resolves the
/// peer's identity and admits it while this loop goes back to accepting.
/// Dropping the endpoint on exit closes the listening socket.
pub(crate) fn accept_loop(endpoint: TcpEndpoint, shared: Arc<RegistryShared>) {
    while !shared.is_stopping() {
        match endpoint.try_accept() {
            Ok(Some(stream)) => {
                let peer = stream.peer_addr();
                let peer_shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name(format!("lenframe-peer-{peer}"))
                    .spawn(move || run_peer(stream, &peer_shared));
                if let Err(err) = spawned {
                    warn!(%peer, error = %err, "failed to start peer thread");
                }
            }
            Ok(None) => thread::sleep(ACCEPT_IDLE),
            Err(err) => {
                warn!(error = %err, "accept failed");
                thread::sleep(ACCEPT_IDLE);
            }
        }
    }
    debug!(local_addr = %endpoint.local_addr(), "accept loop stopped");
}

fn run_peer(stream: NetStream, shared: &RegistryShared) {
    let addr = stream.peer_addr();
    match admit(stream, shared) {
        Ok((reader, peer)) => receive_loop(reader, &peer, shared),
        Err(PeerError::Stopped) => debug!(peer = %addr, "registry stopped during admission"),
        Err(err) => warn!(peer = %addr, error = %err, "peer admission failed"),
    }
}

fn admit(
    stream: NetStream,
    shared: &RegistryShared,
) -> Result<(FrameReader<NetStream>, Arc<PeerEntry>)> {
    let config = &shared.config;
    let frame = FrameConfig {
        read_timeout: Some(config.poll_interval),
        ..config.frame.clone()
    };

    let control = stream.try_clone()?;
    let writer = FrameWriter::with_config_net(stream.try_clone()?, frame.clone())?;
    let reader = FrameReader::with_config_net(stream, &frame, config.frame_timeout)?;

    let key = PeerKey::resolve(control.peer_addr(), config.identity);
    let entry = shared.peers.prepare(key, writer, control);
    let previous = shared.peers.admit(Arc::clone(&entry));

    match &previous {
        Some(previous) => {
            info!(
                peer = %entry.addr(),
                previous = %previous.addr(),
                %key,
                "peer reconnected, replacing previous connection"
            );
            shared.subscribers.publish(RegistryEvent::PeerEvicted {
                addr: previous.addr(),
                reason: EvictReason::Replaced,
            });
        }
        None => info!(peer = %entry.addr(), %key, "peer admitted"),
    }
    shared.subscribers.publish(RegistryEvent::PeerAdmitted {
        addr: entry.addr(),
        replaced: previous.map(|previous| previous.addr()),
    });

    if shared.is_stopping() {
        shared.evict(&entry, EvictReason::Shutdown);
        return Err(PeerError::Stopped);
    }
    Ok((reader, entry))
}

fn receive_loop(mut reader: FrameReader<NetStream>, peer: &PeerEntry, shared: &RegistryShared) {
    loop {
        if shared.is_stopping() {
            shared.evict(peer, EvictReason::Shutdown);
            return;
        }

        match reader.read_messages() {
            Ok(messages) => {
                if !shared.peers.is_live(peer.key(), peer.id()) {
                    debug!(peer = %peer.addr(), "dropping messages from replaced peer");
                    return;
                }
                for text in messages {
                    if is_close_frame(&text) {
                        shared.evict(peer, EvictReason::CloseFrame);
                        return;
                    }
                    shared.subscribers.publish(RegistryEvent::Message {
                        from: peer.addr(),
                        text,
                    });
                }
            }
            Err(err) if err.is_timeout() => continue,
            Err(FrameError::ConnectionClosed) => {
                shared.evict(peer, EvictReason::Disconnected);
                return;
            }
            Err(err) => {
                let reason = PeerError::from(err).reason();
                shared.evict(peer, EvictReason::Transport(reason));
                return;
            }
        }
    }
}

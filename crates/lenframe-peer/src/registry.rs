use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use lenframe_frame::{encode, FrameError};
use lenframe_transport::{TcpEndpoint, TransportError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{IdentityMode, RegistryConfig};
use crate::error::{PeerError, Result};
use crate::event::{EvictReason, RegistryEvent};
use crate::listener::{accept_loop, RegistryShared};

/// Outcome of one [`ServerRegistry::broadcast`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Peers the frame was written to.
    pub delivered: Vec<SocketAddr>,
    /// Peers whose send failed, with the failure reason. They were evicted.
    pub failed: Vec<(SocketAddr, String)>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Listening endpoint that tracks connected peers and broadcasts to them.
///
/// At most one live peer exists per identity key; a new connection with the
/// same key replaces the old one. Stopped on drop.
pub struct ServerRegistry {
    shared: Arc<RegistryShared>,
    local_addr: SocketAddr,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ServerRegistry {
    /// Bind the configured endpoint and start accepting peers.
    pub fn bind(config: RegistryConfig) -> Result<Self> {
        let endpoint = TcpEndpoint::bind(&config.endpoint)?;
        let local_addr = endpoint.local_addr();
        let identity = config.identity;

        let shared = Arc::new(RegistryShared::new(config));
        let accept_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("lenframe-accept".to_string())
            .spawn(move || accept_loop(endpoint, accept_shared))
            .map_err(TransportError::Io)?;

        info!(%local_addr, ?identity, "registry started");

        Ok(Self {
            shared,
            local_addr,
            accept_thread: Mutex::new(Some(handle)),
        })
    }

    /// Receive messages and peer lifecycle events.
    pub fn subscribe(&self) -> Receiver<RegistryEvent> {
        self.shared.subscribers.subscribe()
    }

    /// Send `message` to every live peer.
    ///
    /// The frame is encoded once and written from at most
    /// `broadcast_concurrency` worker threads. A peer whose send fails is
    /// evicted without affecting delivery to the others.
    pub fn broadcast(&self, message: &str) -> Result<BroadcastReport> {
        if self.shared.is_stopping() {
            return Err(PeerError::Stopped);
        }
        let frame = encode(message).map_err(PeerError::from_frame)?;
        let max = self.shared.config.frame.max_frame_len;
        if frame.len() > max {
            return Err(FrameError::FrameTooLarge {
                size: frame.len(),
                max,
            }
            .into());
        }

        let targets = self.shared.peers.snapshot();
        if targets.is_empty() {
            info!("broadcast skipped, no live peers");
            return Ok(BroadcastReport::default());
        }

        let workers = broadcast_workers(self.shared.config.broadcast_concurrency, targets.len());
        let next = AtomicUsize::new(0);
        let report = Mutex::new(BroadcastReport::default());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    while let Some(peer) = targets.get(next.fetch_add(1, Ordering::Relaxed)) {
                        let outcome = peer.send_encoded(&frame);
                        let mut report = report.lock().unwrap_or_else(PoisonError::into_inner);
                        match outcome {
                            Ok(()) => report.delivered.push(peer.addr()),
                            Err(err) => {
                                let reason = err.reason();
                                warn!(peer = %peer.addr(), %reason, "broadcast send failed");
                                report.failed.push((peer.addr(), reason.clone()));
                                drop(report);
                                self.shared.evict(peer, EvictReason::Transport(reason));
                            }
                        }
                    }
                });
            }
        });

        let mut report = report.into_inner().unwrap_or_else(PoisonError::into_inner);
        report.delivered.sort();
        debug!(
            workers,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "broadcast finished"
        );
        Ok(report)
    }

    /// Stop accepting, close every peer and clear subscriptions.
    ///
    /// Idempotent; the listening socket is released before this returns.
    pub fn stop(&self) {
        if !self.shared.begin_stop() {
            return;
        }

        let handle = self
            .accept_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("accept thread panicked");
            }
        }

        for peer in self.shared.peers.drain() {
            peer.close();
            self.shared.subscribers.publish(RegistryEvent::PeerEvicted {
                addr: peer.addr(),
                reason: EvictReason::Shutdown,
            });
        }
        self.shared.subscribers.clear();
        info!(local_addr = %self.local_addr, "registry stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopping()
    }

    pub fn peer_count(&self) -> usize {
        self.shared.peers.len()
    }

    /// Remote addresses of the live peers, sorted.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.shared.peers.addrs()
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The endpoint string this registry was configured with.
    pub fn endpoint(&self) -> &str {
        &self.shared.config.endpoint
    }

    pub fn identity(&self) -> IdentityMode {
        self.shared.config.identity
    }
}

impl Drop for ServerRegistry {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry")
            .field("local_addr", &self.local_addr)
            .field("peers", &self.peer_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Owner of the one registry a process is allowed to run at a time.
///
/// Re-requesting the active endpoint returns the same registry; requesting
/// a different endpoint while one is active is an error until
/// [`RegistrySlot::release`] is called.
#[derive(Default)]
pub struct RegistrySlot {
    active: Mutex<Option<Arc<ServerRegistry>>>,
}

impl RegistrySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn obtain(&self, config: RegistryConfig) -> Result<Arc<ServerRegistry>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = active.as_ref() {
            if existing.is_stopped() {
                *active = None;
            } else if existing.endpoint() == config.endpoint {
                return Ok(Arc::clone(existing));
            } else {
                return Err(PeerError::EndpointInUse {
                    active: existing.endpoint().to_string(),
                    requested: config.endpoint,
                });
            }
        }

        let registry = Arc::new(ServerRegistry::bind(config)?);
        *active = Some(Arc::clone(&registry));
        Ok(registry)
    }

    /// Stop and forget the active registry, if any.
    pub fn release(&self) -> Option<Arc<ServerRegistry>> {
        let released = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(registry) = &released {
            registry.stop();
        }
        released
    }

    pub fn current(&self) -> Option<Arc<ServerRegistry>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|registry| !registry.is_stopped())
            .cloned()
    }
}

/// Worker threads for one broadcast: never more than the peer count.
fn broadcast_workers(concurrency: usize, peers: usize) -> usize {
    concurrency.max(1).min(peers.max(1))
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::{Duration, Instant};

    use lenframe_frame::{encode, FrameReader};

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config() -> RegistryConfig {
        RegistryConfig::new("127.0.0.1:0").with_poll_interval(Duration::from_millis(20))
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    fn next_event(rx: &Receiver<RegistryEvent>) -> RegistryEvent {
        rx.recv_timeout(WAIT).expect("event should arrive")
    }

    fn collect_until(
        rx: &Receiver<RegistryEvent>,
        mut done: impl FnMut(&RegistryEvent) -> bool,
    ) -> Vec<RegistryEvent> {
        let mut events = Vec::new();
        loop {
            let event = next_event(rx);
            let finished = done(&event);
            events.push(event);
            if finished {
                return events;
            }
        }
    }

    fn next_message(rx: &Receiver<RegistryEvent>) -> String {
        loop {
            if let RegistryEvent::Message { text, .. } = next_event(rx) {
                return text;
            }
        }
    }

    fn send_frame(stream: &mut TcpStream, message: &str) {
        stream
            .write_all(&encode(message).expect("encode"))
            .expect("write frame");
    }

    #[test]
    fn forwards_messages_in_order() {
        let registry = ServerRegistry::bind(test_config()).expect("bind");
        let rx = registry.subscribe();

        let mut client = TcpStream::connect(registry.local_addr()).expect("connect");
        assert!(wait_until(|| registry.peer_count() == 1));

        let mut wire = encode("one").unwrap().to_vec();
        wire.extend_from_slice(&encode("two").unwrap());
        client.write_all(&wire).expect("write");
        send_frame(&mut client, "three");

        assert_eq!(next_message(&rx), "one");
        assert_eq!(next_message(&rx), "two");
        assert_eq!(next_message(&rx), "three");
    }

    #[test]
    fn admission_publishes_event() {
        let registry = ServerRegistry::bind(test_config()).expect("bind");
        let rx = registry.subscribe();

        let client = TcpStream::connect(registry.local_addr()).expect("connect");
        let local = client.local_addr().unwrap();

        assert_eq!(
            next_event(&rx),
            RegistryEvent::PeerAdmitted {
                addr: local,
                replaced: None
            }
        );
        assert_eq!(registry.peers(), vec![local]);
    }

    #[test]
    fn identity_collision_replaces_previous_peer() {
        let registry = ServerRegistry::bind(test_config()).expect("bind");
        let rx = registry.subscribe();

        let mut first = TcpStream::connect(registry.local_addr()).expect("first connect");
        let first_addr = first.local_addr().unwrap();
        assert!(wait_until(|| registry.peer_count() == 1));

        let second = TcpStream::connect(registry.local_addr()).expect("second connect");
        let second_addr = second.local_addr().unwrap();
        assert!(wait_until(|| registry.peers() == vec![second_addr]));

        first
            .set_read_timeout(Some(WAIT))
            .expect("set read timeout");
        let mut buf = [0u8; 1];
        assert_eq!(first.read(&mut buf).expect("read"), 0, "first peer closed");

        let events = collect_until(&rx, |event| {
            matches!(event, RegistryEvent::PeerAdmitted { addr, .. } if *addr == second_addr)
        });
        assert!(events.contains(&RegistryEvent::PeerEvicted {
            addr: first_addr,
            reason: EvictReason::Replaced,
        }));
        assert!(events.contains(&RegistryEvent::PeerAdmitted {
            addr: second_addr,
            replaced: Some(first_addr),
        }));
        let admissions = events
            .iter()
            .filter(|event| matches!(event, RegistryEvent::PeerAdmitted { addr, .. } if *addr == second_addr))
            .count();
        assert_eq!(admissions, 1);
    }

    #[test]
    fn address_and_port_mode_keeps_both_peers() {
        let config = test_config().with_identity(IdentityMode::AddressAndPort);
        let registry = ServerRegistry::bind(config).expect("bind");

        let _a = TcpStream::connect(registry.local_addr()).expect("connect a");
        let _b = TcpStream::connect(registry.local_addr()).expect("connect b");

        assert!(wait_until(|| registry.peer_count() == 2));
    }

    #[test]
    fn close_frame_evicts_without_data_event() {
        let registry = ServerRegistry::bind(test_config()).expect("bind");
        let rx = registry.subscribe();

        let mut client = TcpStream::connect(registry.local_addr()).expect("connect");
        let local = client.local_addr().unwrap();
        assert!(wait_until(|| registry.peer_count() == 1));

        let mut wire = encode("closesocket").unwrap().to_vec();
        wire.extend_from_slice(&encode("after close").unwrap());
        client.write_all(&wire).expect("write");

        let events = collect_until(&rx, |event| {
            matches!(event, RegistryEvent::PeerEvicted { .. })
        });
        assert_eq!(
            events.last(),
            Some(&RegistryEvent::PeerEvicted {
                addr: local,
                reason: EvictReason::CloseFrame,
            })
        );
        assert_eq!(registry.peer_count(), 0);
        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err(), "no events after close frame");
        assert!(!events
            .iter()
            .any(|event| matches!(event, RegistryEvent::Message { .. })));
    }

    #[test]
    fn disconnect_evicts_peer() {
        let registry = ServerRegistry::bind(test_config()).expect("bind");

        let client = TcpStream::connect(registry.local_addr()).expect("connect");
        assert!(wait_until(|| registry.peer_count() == 1));
        drop(client);

        assert!(wait_until(|| registry.peer_count() == 0));
    }

    #[test]
    fn stalled_partial_frame_is_abandoned() {
        let config = test_config().with_frame_timeout(Some(Duration::from_millis(50)));
        let registry = ServerRegistry::bind(config).expect("bind");
        let rx = registry.subscribe();

        let mut client = TcpStream::connect(registry.local_addr()).expect("connect");
        assert!(wait_until(|| registry.peer_count() == 1));

        client.write_all(b"LEN=0000000020").expect("write header");
        thread::sleep(Duration::from_millis(200));
        send_frame(&mut client, "fresh");

        assert_eq!(next_message(&rx), "fresh");
        assert_eq!(registry.peer_count(), 1);
    }

    #[test]
    fn broadcast_reaches_every_peer() {
        let config = test_config().with_identity(IdentityMode::AddressAndPort);
        let registry = ServerRegistry::bind(config).expect("bind");

        let clients: Vec<TcpStream> = (0..7)
            .map(|_| TcpStream::connect(registry.local_addr()).expect("connect"))
            .collect();
        assert!(wait_until(|| registry.peer_count() == clients.len()));

        let report = registry.broadcast("hello all").expect("broadcast");
        assert_eq!(report.delivered.len(), 7);
        assert!(report.is_complete());

        for client in clients {
            client.set_read_timeout(Some(WAIT)).unwrap();
            let mut reader = FrameReader::new(client);
            assert_eq!(reader.read_messages().expect("read"), vec!["hello all"]);
        }
    }

    #[test]
    fn broadcast_failure_evicts_only_that_peer() {
        let config = test_config().with_identity(IdentityMode::AddressAndPort);
        let registry = ServerRegistry::bind(config).expect("bind");
        let rx = registry.subscribe();

        let clients: Vec<TcpStream> = (0..4)
            .map(|_| TcpStream::connect(registry.local_addr()).expect("connect"))
            .collect();
        assert!(wait_until(|| registry.peer_count() == clients.len()));

        let broken = registry.shared.peers.snapshot()[0].clone();
        broken.control().shutdown_write().expect("half-close");

        let report = registry.broadcast("survivors").expect("broadcast");
        assert_eq!(report.attempted(), 4);
        assert_eq!(report.delivered.len(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, broken.addr());
        assert!(!report.delivered.contains(&broken.addr()));
        assert!(!report.is_complete());

        let events = collect_until(&rx, |event| {
            matches!(event, RegistryEvent::PeerEvicted { addr, .. } if *addr == broken.addr())
        });
        assert!(matches!(
            events.last(),
            Some(RegistryEvent::PeerEvicted {
                reason: EvictReason::Transport(_),
                ..
            })
        ));
        assert_eq!(registry.peer_count(), 3);
        assert!(!registry.peers().contains(&broken.addr()));

        for client in clients {
            if client.local_addr().ok() == Some(broken.addr()) {
                continue;
            }
            client.set_read_timeout(Some(WAIT)).unwrap();
            let mut reader = FrameReader::new(client);
            assert_eq!(reader.read_messages().expect("read"), vec!["survivors"]);
        }
    }

    #[test]
    fn broadcast_workers_are_capped() {
        assert_eq!(broadcast_workers(5, 12), 5);
        assert_eq!(broadcast_workers(5, 3), 3);
        assert_eq!(broadcast_workers(0, 3), 1);
        assert_eq!(broadcast_workers(8, 1), 1);
    }

    #[test]
    fn broadcast_without_peers_is_noop() {
        let registry = ServerRegistry::bind(test_config()).expect("bind");
        let report = registry.broadcast("nobody").expect("broadcast");
        assert_eq!(report.attempted(), 0);
    }

    #[test]
    fn broadcast_rejects_empty_message() {
        let registry = ServerRegistry::bind(test_config()).expect("bind");
        let err = registry.broadcast("").unwrap_err();
        assert!(matches!(err, PeerError::InvalidArgument(_)));
    }

    #[test]
    fn stop_closes_listener_and_peers() {
        let registry = ServerRegistry::bind(test_config()).expect("bind");
        let addr = registry.local_addr();

        let mut client = TcpStream::connect(addr).expect("connect");
        assert!(wait_until(|| registry.peer_count() == 1));

        registry.stop();
        registry.stop();

        assert!(registry.is_stopped());
        assert_eq!(registry.peer_count(), 0);
        client.set_read_timeout(Some(WAIT)).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).expect("read"), 0);
        assert!(matches!(
            registry.broadcast("late"),
            Err(PeerError::Stopped)
        ));

        let rebound = ServerRegistry::bind(RegistryConfig::new(addr.to_string()));
        assert!(rebound.is_ok(), "endpoint should be free after stop");
    }

    #[test]
    fn slot_returns_same_registry_for_same_endpoint() {
        let slot = RegistrySlot::new();
        let first = slot.obtain(test_config()).expect("obtain");
        let again = slot.obtain(test_config()).expect("obtain again");

        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn slot_rejects_second_endpoint_until_released() {
        let slot = RegistrySlot::new();
        let first = slot.obtain(test_config()).expect("obtain");

        let err = slot
            .obtain(RegistryConfig::new("127.0.0.1:1"))
            .unwrap_err();
        assert!(matches!(err, PeerError::EndpointInUse { .. }));

        let released = slot.release().expect("release");
        assert!(Arc::ptr_eq(&first, &released));
        assert!(released.is_stopped());
        assert!(slot.current().is_none());

        let fresh = slot.obtain(test_config()).expect("obtain after release");
        assert!(!Arc::ptr_eq(&first, &fresh));
    }
}

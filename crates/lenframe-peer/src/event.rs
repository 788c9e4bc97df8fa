use std::net::SocketAddr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use serde::Serialize;

/// Events emitted by a [`crate::ClientSupervisor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// One complete message received from the server.
    Message { text: String },
    /// The connected flag or the reason text changed (or a re-check forced it).
    Status { connected: bool, reason: String },
}

/// Why a peer left the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictReason {
    /// The peer sent the close frame.
    CloseFrame,
    /// A new connection with the same identity key replaced it.
    Replaced,
    /// Reading from or writing to the peer failed.
    Transport(String),
    /// The peer closed the connection.
    Disconnected,
    /// The registry was stopped.
    Shutdown,
}

impl std::fmt::Display for EvictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CloseFrame => f.write_str("close frame received"),
            Self::Replaced => f.write_str("replaced by reconnect"),
            Self::Transport(reason) => write!(f, "transport error: {reason}"),
            Self::Disconnected => f.write_str("peer disconnected"),
            Self::Shutdown => f.write_str("registry stopped"),
        }
    }
}

/// Events emitted by a [`crate::ServerRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// One complete message received from a peer.
    Message { from: SocketAddr, text: String },
    /// A peer was admitted; `replaced` holds the evicted peer on a reconnect.
    PeerAdmitted {
        addr: SocketAddr,
        replaced: Option<SocketAddr>,
    },
    /// A peer was removed from the live set.
    PeerEvicted { addr: SocketAddr, reason: EvictReason },
}

/// Observer list backed by channels.
///
/// Each subscriber owns a `Receiver`; dropping it unsubscribes on the next
/// publish.
pub(crate) struct Subscribers<E> {
    senders: Mutex<Vec<Sender<E>>>,
}

impl<E: Clone> Subscribers<E> {
    pub(crate) fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    pub(crate) fn publish(&self, event: E) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub(crate) fn clear(&self) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.clear();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.senders.lock().map(|senders| senders.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_every_subscriber() {
        let subscribers = Subscribers::new();
        let a = subscribers.subscribe();
        let b = subscribers.subscribe();

        subscribers.publish(ClientEvent::Message {
            text: "hi".to_string(),
        });

        let expected = ClientEvent::Message {
            text: "hi".to_string(),
        };
        assert_eq!(a.try_recv().expect("a should receive"), expected);
        assert_eq!(b.try_recv().expect("b should receive"), expected);
    }

    #[test]
    fn dropped_receiver_is_pruned() {
        let subscribers = Subscribers::new();
        let kept = subscribers.subscribe();
        drop(subscribers.subscribe());

        subscribers.publish(1u32);

        assert_eq!(subscribers.len(), 1);
        assert_eq!(kept.try_recv().expect("kept receiver should get event"), 1);
    }

    #[test]
    fn clear_disconnects_receivers() {
        let subscribers = Subscribers::<u32>::new();
        let rx = subscribers.subscribe();
        subscribers.clear();
        subscribers.publish(7);

        assert!(rx.recv().is_err());
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = RegistryEvent::PeerEvicted {
            addr: "127.0.0.1:4000".parse().unwrap(),
            reason: EvictReason::CloseFrame,
        };
        let json = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(json["event"], "peer_evicted");
        assert_eq!(json["addr"], "127.0.0.1:4000");
        assert_eq!(json["reason"], "close_frame");

        let status = ClientEvent::Status {
            connected: true,
            reason: "connected".to_string(),
        };
        let json = serde_json::to_value(&status).expect("status should serialize");
        assert_eq!(json["event"], "status");
        assert_eq!(json["connected"], true);
    }

    #[test]
    fn evict_reason_display() {
        assert_eq!(
            EvictReason::Transport("Code:104 reset".to_string()).to_string(),
            "transport error: Code:104 reset"
        );
        assert_eq!(EvictReason::Replaced.to_string(), "replaced by reconnect");
    }
}

use std::net::SocketAddr;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use lenframe_frame::{FrameConfig, FrameError, FrameReader, FrameWriter, CLOSE_SOCKET};
use lenframe_transport::{NetStream, TcpEndpoint, TransportError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{PeerError, Result};
use crate::event::{ClientEvent, Subscribers};

/// Connection state of a [`ClientSupervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

type SharedWriter = Arc<Mutex<FrameWriter<NetStream>>>;

struct Link {
    generation: u64,
    writer: SharedWriter,
    control: NetStream,
}

struct ClientState {
    link: Option<Link>,
    status: ConnectionStatus,
    reported: Option<(bool, String)>,
    idle_ticks: u32,
    generation: u64,
    stopped: bool,
    receiver: Option<JoinHandle<()>>,
}

impl ClientState {
    fn holds(&self, generation: u64) -> bool {
        !self.stopped
            && self
                .link
                .as_ref()
                .is_some_and(|link| link.generation == generation)
    }
}

fn lock_writer(writer: &SharedWriter) -> MutexGuard<'_, FrameWriter<NetStream>> {
    writer.lock().unwrap_or_else(PoisonError::into_inner)
}

type OpenedLink = (FrameReader<NetStream>, FrameWriter<NetStream>, NetStream);

struct ClientShared {
    config: ClientConfig,
    state: Mutex<ClientState>,
    wake: Condvar,
    subscribers: Subscribers<ClientEvent>,
}

impl ClientShared {
    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a status event if the flag or reason changed, or if forced.
    fn push_status(&self, state: &mut ClientState, connected: bool, reason: String, force: bool) {
        let changed = state
            .reported
            .as_ref()
            .is_none_or(|(was, text)| *was != connected || *text != reason);
        if !changed && !force {
            return;
        }

        debug!(endpoint = %self.config.endpoint, connected, %reason, "status");
        state.reported = Some((connected, reason.clone()));
        self.subscribers.publish(ClientEvent::Status { connected, reason });
    }

    /// Close the current transport and arrange a reconnect on the next tick.
    fn drop_link(&self, state: &mut ClientState, reason: String) {
        if let Some(link) = state.link.take() {
            if let Err(err) = link.control.shutdown() {
                debug!(error = %err, "shutdown after failure");
            }
        }
        state.status = ConnectionStatus::Disconnected;
        state.idle_ticks = self.config.check_every_ticks.saturating_sub(1);
        warn!(endpoint = %self.config.endpoint, %reason, "connection lost");
        self.push_status(state, false, reason, false);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().holds(generation)
    }

    /// Probe the current link. Returns false when there is none or it is dead.
    fn check_liveness(&self, state: &mut ClientState) -> bool {
        let Some(link) = state.link.as_ref() else {
            return false;
        };

        let liveness = link.control.probe(self.config.probe);
        if liveness.is_alive() {
            self.push_status(state, true, liveness.reason(), self.config.report_liveness);
            return true;
        }

        let reason = liveness.reason();
        if let Some(link) = state.link.take() {
            if let Err(err) = link.control.shutdown() {
                debug!(error = %err, "shutdown of dead link");
            }
        }
        state.status = ConnectionStatus::Disconnected;
        info!(endpoint = %self.config.endpoint, %reason, "liveness probe failed");
        self.push_status(state, false, reason, true);
        false
    }

    fn open(&self, stream: NetStream) -> Result<OpenedLink> {
        let frame = FrameConfig {
            read_timeout: Some(self.config.poll_interval),
            ..self.config.frame.clone()
        };
        let control = stream.try_clone()?;
        let writer = FrameWriter::with_config_net(stream.try_clone()?, frame.clone())?;
        let reader = FrameReader::with_config_net(stream, &frame, None)?;
        Ok((reader, writer, control))
    }
}

/// Keeps one outbound connection alive and reports what happens to it.
///
/// A monitor thread ticks every `tick_interval`. Every `check_every_ticks`
/// idle ticks it probes the connection and reconnects when there is none or
/// the probe fails. Received messages and status changes are delivered to
/// [`ClientSupervisor::subscribe`] receivers. Stopped on drop.
pub struct ClientSupervisor {
    shared: Arc<ClientShared>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ClientSupervisor {
    /// Start supervising `config.endpoint`. The first connect attempt runs
    /// on the monitor's first tick.
    pub fn start(config: ClientConfig) -> Result<Self> {
        let first_check = config.check_every_ticks.saturating_sub(1);
        let shared = Arc::new(ClientShared {
            state: Mutex::new(ClientState {
                link: None,
                status: ConnectionStatus::Disconnected,
                reported: None,
                idle_ticks: first_check,
                generation: 0,
                stopped: false,
                receiver: None,
            }),
            wake: Condvar::new(),
            subscribers: Subscribers::new(),
            config,
        });

        let monitor_shared = Arc::clone(&shared);
        let monitor = thread::Builder::new()
            .name("lenframe-monitor".to_string())
            .spawn(move || monitor_loop(monitor_shared))
            .map_err(TransportError::Io)?;

        info!(endpoint = %shared.config.endpoint, "client supervisor started");

        Ok(Self {
            shared,
            monitor: Mutex::new(Some(monitor)),
        })
    }

    /// Start supervising `address:port` with default settings.
    pub fn connect(address: &str, port: u16) -> Result<Self> {
        Self::start(ClientConfig::from_host(address, port)?)
    }

    /// Receive messages and status changes.
    pub fn subscribe(&self) -> Receiver<ClientEvent> {
        self.shared.subscribers.subscribe()
    }

    /// Encode and write `message` on the current connection.
    ///
    /// Fails with [`PeerError::NotConnected`] when there is no live
    /// connection; the message is not queued. A write failure drops the
    /// connection so the monitor reconnects on its next tick.
    ///
    /// The write runs outside the supervisor state lock, so a stalled
    /// server does not block `status()` or the monitor.
    pub fn send(&self, message: &str) -> Result<()> {
        if message.is_empty() {
            return Err(PeerError::InvalidArgument("message must not be empty"));
        }

        let (generation, writer) = {
            let state = self.shared.lock();
            if state.stopped {
                return Err(PeerError::Stopped);
            }
            let Some(link) = state.link.as_ref() else {
                return Err(PeerError::NotConnected(self.shared.config.endpoint));
            };
            (link.generation, Arc::clone(&link.writer))
        };

        let result = lock_writer(&writer).send(message);

        let mut state = self.shared.lock();
        match result {
            Ok(()) => {
                if state.holds(generation) {
                    state.idle_ticks = 0;
                }
                Ok(())
            }
            Err(err @ (FrameError::Io(_) | FrameError::ConnectionClosed)) => {
                let err = PeerError::from(err);
                if state.holds(generation) {
                    self.shared.drop_link(&mut state, err.reason());
                }
                Err(err)
            }
            Err(err) => Err(PeerError::from_frame(err)),
        }
    }

    /// Send the close frame, drop every subscription and the connection,
    /// and join the monitor thread. Idempotent.
    pub fn stop(&self) {
        let (link, receiver) = {
            let mut state = self.shared.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.status = ConnectionStatus::Disconnected;
            self.shared.subscribers.clear();
            (state.link.take(), state.receiver.take())
        };
        self.shared.wake.notify_all();

        if let Some(link) = link {
            if let Err(err) = lock_writer(&link.writer).send(CLOSE_SOCKET) {
                debug!(error = %err, "close frame not delivered");
            }
            if let Err(err) = link.control.shutdown() {
                debug!(error = %err, "shutdown on stop");
            }
        }

        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        for handle in monitor.into_iter().chain(receiver) {
            if handle.join().is_err() {
                warn!("client thread panicked");
            }
        }
        info!(endpoint = %self.shared.config.endpoint, "client supervisor stopped");
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.shared.config.endpoint
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock().stopped
    }
}

impl Drop for ClientSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ClientSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSupervisor")
            .field("endpoint", &self.endpoint())
            .field("status", &self.status())
            .finish()
    }
}

fn monitor_loop(shared: Arc<ClientShared>) {
    let mut state = shared.lock();
    loop {
        if state.stopped {
            break;
        }

        state.idle_ticks += 1;
        if state.idle_ticks >= shared.config.check_every_ticks {
            state.idle_ticks = 0;
            if !shared.check_liveness(&mut state) {
                state = reconnect(&shared, state);
                if state.stopped {
                    break;
                }
            }
        }

        let (guard, _) = shared
            .wake
            .wait_timeout_while(state, shared.config.tick_interval, |state| !state.stopped)
            .unwrap_or_else(PoisonError::into_inner);
        state = guard;
    }
    debug!(endpoint = %shared.config.endpoint, "monitor stopped");
}

/// Run one connect attempt with the state lock released.
fn reconnect<'a>(
    shared: &'a Arc<ClientShared>,
    mut state: MutexGuard<'a, ClientState>,
) -> MutexGuard<'a, ClientState> {
    state.status = ConnectionStatus::Connecting;
    let endpoint = shared.config.endpoint;
    drop(state);

    debug!(%endpoint, "connecting");
    let attempt = TcpEndpoint::connect(endpoint, shared.config.connect_timeout)
        .map_err(PeerError::from)
        .and_then(|stream| shared.open(stream));

    let mut state = shared.lock();
    if state.stopped {
        if let Ok((_, _, control)) = attempt {
            if let Err(err) = control.shutdown() {
                debug!(error = %err, "shutdown of abandoned connection");
            }
        }
        return state;
    }

    match attempt {
        Ok((reader, writer, control)) => {
            state.generation += 1;
            let generation = state.generation;
            state.link = Some(Link {
                generation,
                writer: Arc::new(Mutex::new(writer)),
                control,
            });
            state.status = ConnectionStatus::Connected;
            state.idle_ticks = 0;

            let receiver_shared = Arc::clone(shared);
            let spawned = thread::Builder::new()
                .name("lenframe-receive".to_string())
                .spawn(move || receive_loop(&receiver_shared, reader, generation));
            match spawned {
                Ok(handle) => {
                    state.receiver = Some(handle);
                    info!(%endpoint, "connected");
                    shared.push_status(&mut state, true, format!("connected to {endpoint}"), true);
                }
                Err(err) => {
                    let reason = PeerError::from(TransportError::Io(err)).reason();
                    shared.drop_link(&mut state, reason);
                }
            }
        }
        Err(err) => {
            state.status = ConnectionStatus::Disconnected;
            let reason = err.reason();
            debug!(%endpoint, %reason, "connect failed");
            shared.push_status(&mut state, false, reason, false);
        }
    }
    state
}

fn receive_loop(shared: &ClientShared, mut reader: FrameReader<NetStream>, generation: u64) {
    loop {
        match reader.read_messages() {
            Ok(messages) => {
                if !shared.is_current(generation) {
                    return;
                }
                for text in messages {
                    shared.subscribers.publish(ClientEvent::Message { text });
                }
            }
            Err(err) if err.is_timeout() => {
                if !shared.is_current(generation) {
                    return;
                }
            }
            Err(err) => {
                let reason = PeerError::from(err).reason();
                let mut state = shared.lock();
                if state.holds(generation) {
                    shared.drop_link(&mut state, reason);
                }
                return;
            }
        }
    }
}

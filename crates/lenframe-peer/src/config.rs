use std::net::SocketAddr;
use std::time::Duration;

use lenframe_frame::{FrameConfig, DEFAULT_FRAME_TIMEOUT};
use lenframe_transport::{resolve, ProbeMode};

use crate::error::Result;

/// Monitor loop period of the client supervisor.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Idle ticks between liveness checks.
pub const DEFAULT_CHECK_EVERY_TICKS: u32 = 10;
/// Bounded wait for a connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How often blocked reads and the accept loop look at stop flags.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Upper bound on concurrent sends during a broadcast.
pub const DEFAULT_BROADCAST_CONCURRENCY: usize = 5;
/// Default write timeout so one stalled peer cannot hang a sender forever.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

fn default_frame_config() -> FrameConfig {
    FrameConfig {
        write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
        ..FrameConfig::default()
    }
}

/// Configuration for a [`crate::ClientSupervisor`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Remote endpoint to keep connected to.
    pub endpoint: SocketAddr,
    /// Period of the monitor loop.
    pub tick_interval: Duration,
    /// Number of idle ticks before a liveness check (and reconnect if needed).
    pub check_every_ticks: u32,
    /// Bounded wait for each connect attempt.
    pub connect_timeout: Duration,
    /// How the liveness probe touches the socket.
    pub probe: ProbeMode,
    /// Re-emit the connected status after every successful liveness check.
    pub report_liveness: bool,
    /// Read timeout of the receive thread; bounds how long stop takes.
    pub poll_interval: Duration,
    /// Frame limits and write timeout.
    pub frame: FrameConfig,
}

impl ClientConfig {
    pub fn new(endpoint: SocketAddr) -> Self {
        Self {
            endpoint,
            tick_interval: DEFAULT_TICK_INTERVAL,
            check_every_ticks: DEFAULT_CHECK_EVERY_TICKS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            probe: ProbeMode::default(),
            report_liveness: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            frame: default_frame_config(),
        }
    }

    /// Build a config from a host name or address and a port.
    pub fn from_host(address: &str, port: u16) -> Result<Self> {
        let endpoint = resolve(&format!("{address}:{port}"))?;
        Ok(Self::new(endpoint))
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_check_every_ticks(mut self, ticks: u32) -> Self {
        self.check_every_ticks = ticks.max(1);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_probe(mut self, probe: ProbeMode) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_report_liveness(mut self, report: bool) -> Self {
        self.report_liveness = report;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }
}

/// Which part of a peer's address identifies it in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdentityMode {
    /// One peer per remote IP address; a reconnect from a new port replaces it.
    #[default]
    Address,
    /// One peer per remote (IP, port) pair.
    AddressAndPort,
}

impl IdentityMode {
    /// Map the "deduplicate by address only" switch to a mode.
    pub fn from_address_only(address_only: bool) -> Self {
        if address_only {
            Self::Address
        } else {
            Self::AddressAndPort
        }
    }
}

/// Configuration for a [`crate::ServerRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Address to bind, e.g. `"0.0.0.0:11000"`.
    pub endpoint: String,
    /// Peer identity used for deduplication.
    pub identity: IdentityMode,
    /// Deadline for completing a partially received frame; `None` disables it.
    pub frame_timeout: Option<Duration>,
    /// Upper bound on concurrent sends during a broadcast.
    pub broadcast_concurrency: usize,
    /// Accept-loop and receive-loop polling period.
    pub poll_interval: Duration,
    /// Frame limits and write timeout.
    pub frame: FrameConfig,
}

impl RegistryConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            identity: IdentityMode::default(),
            frame_timeout: Some(DEFAULT_FRAME_TIMEOUT),
            broadcast_concurrency: DEFAULT_BROADCAST_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            frame: default_frame_config(),
        }
    }

    /// Build a config from address, port and the address-only dedup switch.
    pub fn from_host(address: &str, port: u16, address_only: bool) -> Self {
        Self::new(format!("{address}:{port}"))
            .with_identity(IdentityMode::from_address_only(address_only))
    }

    pub fn with_identity(mut self, identity: IdentityMode) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_frame_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.frame_timeout = timeout;
        self
    }

    pub fn with_broadcast_concurrency(mut self, concurrency: usize) -> Self {
        self.broadcast_concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }
}

//! Gofer Tunnel Session
//!
//! A session binds one local interface to one remote peer. Once started it
//! runs two forwarding loops (plus an optional keepalive task) on the tokio
//! runtime; they share a shutdown signal, and whichever loop fails first
//! raises it so the other follows.

mod error;
mod forward;
mod send;
mod stats;

pub use error::{classify, network_io_level, ErrorLevel, SessionError};
pub use send::{
    is_keepalive, keepalive_payload, keepalive_timestamp, redundant_copies, KEEPALIVE_TAG,
};
pub use stats::{SessionStats, StatsSnapshot};

use crate::address::TunnelAddrs;
use crate::cipher::{Cipher, ENVELOPE_OVERHEAD};
use crate::config::{Config, Role};
use crate::dedup::{DuplicateRegister, DUPLICATE_WINDOW};
use crate::transport::Transport;
use crate::tun::TunDevice;
use forward::{interface_to_network, network_to_interface, Inbound};
use send::{run_keepalive, Outbound};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Slack added to receive buffers beyond the MTU.
const BUFFER_HEADROOM: usize = 100;

/// Session lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created but not started.
    Created,
    /// Forwarding traffic.
    Running,
    /// Shutdown raised; tasks may still be unwinding.
    Stopping,
    /// All tasks finished and resources released.
    Stopped,
    /// Start failed.
    Failed,
}

impl SessionState {
    /// Check if the session is forwarding traffic.
    pub fn is_operational(&self) -> bool {
        matches!(self, SessionState::Running)
    }

    /// Check if the session can be started.
    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Created)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One-shot shutdown signal shared by the session and its tasks.
#[derive(Clone, Debug)]
pub(crate) struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the signal. Returns true only for the call that raised it.
    pub(crate) fn trigger(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub(crate) fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has been raised.
    pub(crate) async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// An encrypted point-to-point tunnel session.
pub struct Session {
    config: Config,
    role: Role,
    addrs: TunnelAddrs,
    cipher: Arc<Cipher>,
    state: SessionState,
    stats: Arc<SessionStats>,
    shutdown: Shutdown,
    /// Present while running; the interface itself is owned by the loops.
    transport: Option<Arc<Transport>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Build a session from configuration.
    ///
    /// Validates the configuration, parses the key and derives the tunnel
    /// addresses. Nothing is opened until [`start`](Self::start).
    pub fn new(config: Config) -> Result<Self, SessionError> {
        config.validate()?;

        let key = config.tunnel.key.as_deref().unwrap_or_default().trim();
        let cipher = Cipher::from_hex(key)?;
        let addrs = TunnelAddrs::derive(config.tunnel.subnet())?;
        let role = config.role();

        debug!(
            role = %role,
            server = %addrs.server,
            client = %addrs.client,
            "Session created"
        );

        Ok(Self {
            config,
            role,
            addrs,
            cipher: Arc::new(cipher),
            state: SessionState::Created,
            stats: Arc::new(SessionStats::new()),
            shutdown: Shutdown::new(),
            transport: None,
            tasks: Vec::new(),
        })
    }

    // === Accessors ===

    /// Get the session configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the endpoint role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Get the derived tunnel address pair.
    pub fn tunnel_addrs(&self) -> TunnelAddrs {
        self.addrs
    }

    /// This endpoint's tunnel address.
    pub fn local_tunnel_addr(&self) -> Ipv4Addr {
        self.addrs.for_role(self.role).0
    }

    /// The far endpoint's tunnel address.
    pub fn peer_tunnel_addr(&self) -> Ipv4Addr {
        self.addrs.for_role(self.role).1
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        if self.state == SessionState::Running && self.shutdown.is_triggered() {
            SessionState::Stopping
        } else {
            self.state
        }
    }

    /// Check if the session is forwarding traffic.
    pub fn is_running(&self) -> bool {
        self.state().is_operational()
    }

    /// Copy the traffic counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Local transport address, while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref()?.local_addr().ok()
    }

    /// Current remote transport address, while running and once known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.transport.as_ref()?.peer_addr()
    }

    // === Lifecycle ===

    /// Create and configure the TUN/TAP interface, then start forwarding.
    ///
    /// Requires CAP_NET_ADMIN.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if !self.state.can_start() {
            return Err(SessionError::AlreadyStarted);
        }

        let (local, peer) = (self.local_tunnel_addr(), self.peer_tunnel_addr());
        let device = match TunDevice::create(&self.config.tunnel).await {
            Ok(device) => device,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e.into());
            }
        };
        if let Err(e) = device.configure(local, peer).await {
            self.state = SessionState::Failed;
            return Err(e.into());
        }

        self.start_with_interface(device.into_device()).await
    }

    /// Start forwarding between the transport and an already open interface.
    ///
    /// Each read from `interface` must yield exactly one frame, and each
    /// write must deliver exactly one frame.
    pub async fn start_with_interface<I>(&mut self, interface: I) -> Result<(), SessionError>
    where
        I: AsyncRead + AsyncWrite + Send + 'static,
    {
        if !self.state.can_start() {
            return Err(SessionError::AlreadyStarted);
        }
        if self.shutdown.is_triggered() {
            return Err(SessionError::Closed);
        }

        let transport = match Transport::open(&self.config).await {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e.into());
            }
        };

        let mtu = self.config.tunnel.mtu() as usize;
        let (reader, writer) = tokio::io::split(interface);

        let inbound = Inbound::new(
            self.cipher.clone(),
            DuplicateRegister::new(DUPLICATE_WINDOW),
            self.stats.clone(),
        );
        let outbound = Arc::new(Outbound::new(
            self.cipher.clone(),
            transport.clone(),
            self.config.transport.multi_send(),
            self.stats.clone(),
        ));

        self.tasks.push(tokio::spawn(network_to_interface(
            transport.clone(),
            inbound,
            writer,
            mtu + BUFFER_HEADROOM + ENVELOPE_OVERHEAD,
            self.shutdown.clone(),
        )));
        self.tasks.push(tokio::spawn(interface_to_network(
            outbound.clone(),
            reader,
            mtu + BUFFER_HEADROOM,
            self.shutdown.clone(),
        )));
        if let Some(interval) = self.config.transport.keepalive_interval() {
            self.tasks.push(tokio::spawn(run_keepalive(
                outbound,
                interval,
                self.shutdown.clone(),
            )));
        }

        info!(
            role = %self.role,
            protocol = %transport.protocol(),
            local_addr = ?transport.local_addr().ok(),
            peer_addr = ?transport.peer_addr(),
            tunnel_local = %self.local_tunnel_addr(),
            tunnel_peer = %self.peer_tunnel_addr(),
            multi_send = self.config.transport.multi_send(),
            "Session started"
        );

        self.transport = Some(transport);
        self.state = SessionState::Running;
        Ok(())
    }

    /// Raise the shutdown signal. Idempotent and non-blocking.
    ///
    /// Resources are released as the tasks observe the signal: each loop
    /// drops its interface half on exit, and the transport socket stays
    /// bound (so [`local_addr`](Self::local_addr) still answers) until
    /// [`wait`](Self::wait) has joined the tasks or the session is dropped.
    pub fn close(&self) {
        if self.shutdown.trigger() {
            info!("Session closing");
        }
    }

    /// Resolve once shutdown has been raised, by [`close`](Self::close) or
    /// by a fatal error in either loop.
    pub async fn closed(&self) {
        self.shutdown.triggered().await
    }

    /// Wait for every task to finish and release the transport.
    ///
    /// Returns immediately if the session never started.
    pub async fn wait(&mut self) {
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Session task panicked");
            }
        }

        if self.transport.take().is_some() {
            self.state = SessionState::Stopped;
            let stats = self.stats.snapshot();
            info!(
                rx_packets = stats.rx_packets,
                tx_packets = stats.tx_packets,
                tx_datagrams = stats.tx_datagrams,
                duplicates = stats.duplicates,
                "Session stopped"
            );
        }
    }

    /// Close and wait. Safe to call more than once.
    pub async fn stop(&mut self) {
        self.close();
        self.wait().await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("state", &self.state())
            .field("addrs", &self.addrs)
            .field("transport", &self.transport)
            .finish()
    }
}

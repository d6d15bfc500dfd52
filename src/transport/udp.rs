//! UDP Transport Implementation
//!
//! Client and server datagram endpoints. The client dials a fixed remote
//! once; the server listens on a wildcard address and follows whichever
//! address its authenticated peer last sent from, so the peer may roam or
//! be rebound by a NAT.

use super::TransportError;
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// UDP endpoint connected to a fixed remote.
#[derive(Debug)]
pub struct UdpClient {
    socket: UdpSocket,
    remote: SocketAddr,
}

impl UdpClient {
    /// Resolve `host:port` and connect an ephemeral socket to it.
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let bind_addr: SocketAddr = if host.contains(':') && !host.starts_with('[') {
            // Bare IPv6 literal
            SocketAddr::from(([0u16; 8], 0))
        } else {
            SocketAddr::from(([0, 0, 0, 0], 0))
        };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TransportError::StartFailed(format!("bind failed: {}", e)))?;

        let target = match host.parse::<std::net::IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, port),
            Err(_) => tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| TransportError::StartFailed(format!("resolve {}: {}", host, e)))?
                .find(|addr| addr.is_ipv4() == bind_addr.is_ipv4())
                .ok_or_else(|| {
                    TransportError::StartFailed(format!("no usable address for {}", host))
                })?,
        };

        socket
            .connect(target)
            .await
            .map_err(|e| TransportError::StartFailed(format!("connect {}: {}", target, e)))?;

        info!(
            remote = %target,
            local_addr = %socket.local_addr()?,
            "UDP client connected"
        );

        Ok(Self {
            socket,
            remote: target,
        })
    }

    /// Send one datagram to the remote.
    pub async fn send(&self, datagram: &[u8]) -> Result<usize, TransportError> {
        Ok(self.socket.send(datagram).await?)
    }

    /// Receive one datagram from the remote.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError> {
        let len = self.socket.recv(buf).await?;
        Ok((len, self.remote))
    }

    /// The fixed remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Local bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

/// UDP endpoint listening for its peer.
#[derive(Debug)]
pub struct UdpServer {
    socket: UdpSocket,
    /// Written by the receive loop, read by the send path. Never held
    /// across an await.
    peer: Mutex<Option<SocketAddr>>,
}

impl UdpServer {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| TransportError::StartFailed(format!("bind {}: {}", addr, e)))?;

        info!(local_addr = %socket.local_addr()?, "UDP server listening");

        Ok(Self {
            socket,
            peer: Mutex::new(None),
        })
    }

    /// Send one datagram to the most recently learned peer.
    pub async fn send(&self, datagram: &[u8]) -> Result<usize, TransportError> {
        let peer = self.peer_addr().ok_or(TransportError::NoPeer)?;
        Ok(self.socket.send_to(datagram, peer).await?)
    }

    /// Receive one datagram from anyone.
    ///
    /// The sender is not trusted until the caller has authenticated the
    /// payload and calls [`learn_peer`](Self::learn_peer).
    pub async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError> {
        Ok(self.socket.recv_from(buf).await?)
    }

    /// Replace the peer address. Returns true if it changed.
    pub fn learn_peer(&self, addr: SocketAddr) -> bool {
        let mut peer = match self.peer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *peer == Some(addr) {
            return false;
        }
        debug!(old = ?*peer, new = %addr, "UDP peer address updated");
        *peer = Some(addr);
        true
    }

    /// Most recently learned peer address.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self.peer.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Local bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }
}

// ============================================================================
// Tests
// ============================================================================

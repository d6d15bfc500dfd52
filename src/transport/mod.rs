//! Transport Layer
//!
//! The tunnel talks to exactly one peer over one of a closed set of
//! transport variants. Datagram (UDP) variants are implemented; the stream
//! framing used by a reliable transport lives in [`stream`].

pub mod stream;
pub mod udp;

use crate::config::{Config, Protocol, Role};
use std::net::SocketAddr;
use thiserror::Error;

pub use udp::{UdpClient, UdpServer};

// ============================================================================
// Errors
// ============================================================================

/// Errors related to transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport failed to start: {0}")]
    StartFailed(String),

    #[error("no peer address learned yet")]
    NoPeer,

    #[error("frame too large: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("transport not supported: {0}")]
    NotSupported(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Transport
// ============================================================================

/// A started transport bound to the tunnel's single peer.
///
/// Methods take `&self` so the receive loop and the send path can share
/// one instance. Dropping the last reference closes the socket.
#[derive(Debug)]
pub enum Transport {
    /// Connected UDP socket dialing a fixed remote.
    DatagramClient(UdpClient),
    /// Listening UDP socket whose peer is learned from inbound traffic.
    DatagramServer(UdpServer),
}

impl Transport {
    /// Open the transport variant selected by the configuration.
    pub async fn open(config: &Config) -> Result<Self, TransportError> {
        let port = config.transport.port();
        match (config.transport.proto(), config.role()) {
            (Protocol::Udp, Role::Server) => Ok(Transport::DatagramServer(
                UdpServer::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?,
            )),
            (Protocol::Udp, Role::Client) => {
                let remote = config.transport.remote().unwrap_or_default();
                Ok(Transport::DatagramClient(
                    UdpClient::connect(remote, port).await?,
                ))
            }
            (Protocol::Tcp, role) => Err(TransportError::NotSupported(format!(
                "stream transport ({} role)",
                role
            ))),
        }
    }

    /// Protocol carried by this transport.
    pub fn protocol(&self) -> Protocol {
        match self {
            Transport::DatagramClient(_) | Transport::DatagramServer(_) => Protocol::Udp,
        }
    }

    /// Send one datagram to the peer.
    pub async fn send(&self, datagram: &[u8]) -> Result<usize, TransportError> {
        match self {
            Transport::DatagramClient(client) => client.send(datagram).await,
            Transport::DatagramServer(server) => server.send(datagram).await,
        }
    }

    /// Receive one datagram, returning its length and sender.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError> {
        match self {
            Transport::DatagramClient(client) => client.recv(buf).await,
            Transport::DatagramServer(server) => server.recv(buf).await,
        }
    }

    /// Record the sender of an authenticated datagram.
    ///
    /// Only the server follows its peer; the client's destination is fixed.
    /// Returns true if the peer address changed.
    pub fn learn_peer(&self, addr: SocketAddr) -> bool {
        match self {
            Transport::DatagramClient(_) => false,
            Transport::DatagramServer(server) => server.learn_peer(addr),
        }
    }

    /// Current peer address, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Transport::DatagramClient(client) => Some(client.peer_addr()),
            Transport::DatagramServer(server) => server.peer_addr(),
        }
    }

    /// Local bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        match self {
            Transport::DatagramClient(client) => client.local_addr(),
            Transport::DatagramServer(server) => server.local_addr(),
        }
    }
}

//! The two forwarding loops.
//!
//! network -> interface: receive a datagram, open it, drop duplicates and
//! stale keepalives, learn the sender, write the frame to the interface.
//!
//! interface -> network: read a frame, hand it to the send path.
//!
//! Each loop exits on shutdown or on a fatal error and raises shutdown on
//! its way out, so either direction failing tears down both.

use super::error::{report, ErrorLevel, SessionError};
use super::send::{is_keepalive, keepalive_timestamp, Outbound};
use super::stats::{now_ms, SessionStats};
use super::Shutdown;
use crate::cipher::Cipher;
use crate::dedup::DuplicateRegister;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace};

/// What an authenticated datagram turned out to be.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Accepted {
    /// A frame to deliver to the interface.
    Frame(Vec<u8>),
    /// A fresh liveness signal; nothing to deliver.
    Keepalive,
    /// A redundant copy of a packet already seen, or a stale keepalive.
    Duplicate,
}

/// Receive-side packet state: the cipher and the duplicate register.
pub(crate) struct Inbound {
    cipher: Arc<Cipher>,
    register: DuplicateRegister,
    stats: Arc<SessionStats>,
}

impl Inbound {
    pub(crate) fn new(
        cipher: Arc<Cipher>,
        register: DuplicateRegister,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            cipher,
            register,
            stats,
        }
    }

    /// Open one datagram and decide what to do with it.
    pub(crate) fn accept(&mut self, datagram: &[u8]) -> Result<Accepted, SessionError> {
        let (plaintext, iv) = self
            .cipher
            .decrypt(datagram)
            .map_err(SessionError::InvalidPacket)?;

        self.stats.record_rx(plaintext.len());

        let signature = iv.signature();
        let keepalive = is_keepalive(&plaintext);

        // A keepalive must carry a clock within the window; past it the
        // register no longer remembers the IV and a capture could be replayed.
        if keepalive && !self.is_fresh(&plaintext) {
            self.stats.record_duplicate();
            trace!(%signature, "Stale keepalive dropped");
            return Ok(Accepted::Duplicate);
        }

        if self.register.is_duplicate(signature) {
            self.stats.record_duplicate();
            trace!(%signature, "Duplicate dropped");
            return Ok(Accepted::Duplicate);
        }

        if keepalive {
            self.stats.record_keepalive();
            trace!("Keepalive received");
            return Ok(Accepted::Keepalive);
        }

        Ok(Accepted::Frame(plaintext))
    }

    fn is_fresh(&self, keepalive: &[u8]) -> bool {
        let window_ms = self.register.window().as_millis() as u64;
        keepalive_timestamp(keepalive)
            .is_some_and(|sent_ms| now_ms().abs_diff(sent_ms) <= window_ms)
    }
}

/// Move datagrams from the transport to the interface until shutdown.
pub(crate) async fn network_to_interface<W>(
    transport: Arc<Transport>,
    mut inbound: Inbound,
    mut interface: W,
    buf_len: usize,
    shutdown: Shutdown,
) where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buf_len];
    debug!(buf_len, "network -> interface loop starting");

    loop {
        let received = tokio::select! {
            _ = shutdown.triggered() => Err(SessionError::Closed),
            result = transport.recv(&mut buf) => result.map_err(SessionError::from),
        };
        let (len, from) = match received {
            Ok(received) => received,
            Err(e) => match report(&e, "transport_recv") {
                ErrorLevel::Fatal => break,
                _ => continue,
            },
        };

        if len == 0 {
            continue;
        }

        // Only first sightings may move the peer: a replayed copy sent from
        // another address must not redirect the tunnel.
        let frame = match inbound.accept(&buf[..len]) {
            Ok(Accepted::Duplicate) => continue,
            Ok(accepted) => {
                if transport.learn_peer(from) {
                    info!(peer = %from, "Peer address learned");
                }
                match accepted {
                    Accepted::Frame(frame) => frame,
                    _ => continue,
                }
            }
            Err(e) => {
                trace!(from = %from, len, "Rejected datagram");
                match report(&e, "decode") {
                    ErrorLevel::Fatal => break,
                    _ => continue,
                }
            }
        };

        let written = tokio::select! {
            _ = shutdown.triggered() => Err(SessionError::Closed),
            result = interface.write_all(&frame) => result.map_err(SessionError::Interface),
        };
        if let Err(e) = written {
            if report(&e, "interface_write") == ErrorLevel::Fatal {
                break;
            }
        }
    }

    shutdown.trigger();
    debug!("network -> interface loop stopped");
}

/// Move frames from the interface to the transport until shutdown.
pub(crate) async fn interface_to_network<R>(
    outbound: Arc<Outbound>,
    mut interface: R,
    buf_len: usize,
    shutdown: Shutdown,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buf_len];
    debug!(buf_len, "interface -> network loop starting");

    loop {
        let read = tokio::select! {
            _ = shutdown.triggered() => Err(SessionError::Closed),
            result = interface.read(&mut buf) => match result {
                Ok(0) => Err(SessionError::InterfaceClosed),
                Ok(len) => Ok(len),
                Err(e) => Err(SessionError::Interface(e)),
            },
        };
        let len = match read {
            Ok(len) => len,
            Err(e) => match report(&e, "interface_read") {
                ErrorLevel::Fatal => break,
                _ => continue,
            },
        };

        if let Err(e) = outbound.send(&buf[..len]).await {
            if report(&e, "transport_send") == ErrorLevel::Fatal {
                break;
            }
        }
    }

    shutdown.trigger();
    debug!("interface -> network loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DUPLICATE_WINDOW;
    use crate::session::send::{keepalive_payload, KEEPALIVE_TAG};

    fn inbound(cipher: &Arc<Cipher>) -> (Inbound, Arc<SessionStats>) {
        let stats = Arc::new(SessionStats::new());
        let inbound = Inbound::new(
            cipher.clone(),
            DuplicateRegister::new(DUPLICATE_WINDOW),
            stats.clone(),
        );
        (inbound, stats)
    }

    fn cipher() -> Arc<Cipher> {
        Arc::new(Cipher::new(&[9u8; 32]).unwrap())
    }

    #[test]
    fn test_accept_frame() {
        let cipher = cipher();
        let (mut inbound, stats) = inbound(&cipher);

        let (envelope, _) = cipher.encrypt(b"ip packet").unwrap();
        assert_eq!(
            inbound.accept(&envelope).unwrap(),
            Accepted::Frame(b"ip packet".to_vec())
        );

        let snap = stats.snapshot();
        assert_eq!(snap.rx_packets, 1);
        assert_eq!(snap.rx_bytes, 9);
        assert_eq!(snap.duplicates, 0);
    }

    #[test]
    fn test_accept_drops_redundant_copies() {
        let cipher = cipher();
        let (mut inbound, stats) = inbound(&cipher);

        let (envelope, _) = cipher.encrypt(b"once").unwrap();
        assert!(matches!(inbound.accept(&envelope), Ok(Accepted::Frame(_))));
        assert_eq!(inbound.accept(&envelope).unwrap(), Accepted::Duplicate);
        assert_eq!(inbound.accept(&envelope).unwrap(), Accepted::Duplicate);

        // Same plaintext, fresh IV: a new packet
        let (again, _) = cipher.encrypt(b"once").unwrap();
        assert!(matches!(inbound.accept(&again), Ok(Accepted::Frame(_))));

        let snap = stats.snapshot();
        assert_eq!(snap.rx_packets, 4);
        assert_eq!(snap.duplicates, 2);
    }

    #[test]
    fn test_accept_keepalive() {
        let cipher = cipher();
        let (mut inbound, stats) = inbound(&cipher);

        let payload = keepalive_payload(now_ms());
        let (envelope, _) = cipher.encrypt(&payload).unwrap();
        assert_eq!(inbound.accept(&envelope).unwrap(), Accepted::Keepalive);

        let snap = stats.snapshot();
        assert_eq!(snap.keepalives_rx, 1);
        assert_eq!(snap.rx_packets, 1);
        assert_eq!(snap.rx_bytes, payload.len() as u64);
        assert!(snap.last_rx_ms > 0);
        assert_eq!(snap.duplicates, 0);

        // Redundant copies of a keepalive are duplicates like any packet
        assert_eq!(inbound.accept(&envelope).unwrap(), Accepted::Duplicate);

        let snap = stats.snapshot();
        assert_eq!(snap.keepalives_rx, 1);
        assert_eq!(snap.rx_packets, 2);
        assert_eq!(snap.duplicates, 1);
    }

    #[test]
    fn test_accept_rejects_stale_keepalive() {
        let cipher = cipher();
        let (mut inbound, stats) = inbound(&cipher);
        let window_ms = DUPLICATE_WINDOW.as_millis() as u64;

        for payload in [
            keepalive_payload(now_ms() - 2 * window_ms),
            keepalive_payload(now_ms() + 2 * window_ms),
            keepalive_payload(0),
            KEEPALIVE_TAG.to_vec(),
        ] {
            let (envelope, _) = cipher.encrypt(&payload).unwrap();
            assert_eq!(inbound.accept(&envelope).unwrap(), Accepted::Duplicate);
        }

        let snap = stats.snapshot();
        assert_eq!(snap.keepalives_rx, 0);
        assert_eq!(snap.duplicates, 4);
        assert_eq!(snap.rx_packets, 4);
        assert_eq!(snap.rx_bytes, 3 * 13 + 5);
        assert!(snap.last_rx_ms > 0);
    }

    #[test]
    fn test_accept_rejects_foreign_datagrams() {
        let cipher = cipher();
        let (mut inbound, stats) = inbound(&cipher);

        let other = Cipher::new(&[1u8; 32]).unwrap();
        let (foreign, _) = other.encrypt(b"not for us").unwrap();

        for datagram in [&foreign[..], &[0u8; 10][..], &[0u8; 200][..]] {
            let err = inbound.accept(datagram).unwrap_err();
            assert!(matches!(err, SessionError::InvalidPacket(_)));
            assert_eq!(err.level(), ErrorLevel::Transient);
        }

        assert_eq!(stats.snapshot().rx_packets, 0);
    }
}

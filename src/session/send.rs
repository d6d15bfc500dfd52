//! Outbound path: sealing, redundant send and keepalives.

use super::error::{report, ErrorLevel, SessionError};
use super::stats::{now_ms, SessionStats};
use super::Shutdown;
use crate::cipher::Cipher;
use crate::transport::Transport;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Plaintext prefix marking a keepalive packet.
pub const KEEPALIVE_TAG: &[u8; 5] = b"GOFER";

/// Whether a decrypted payload is a keepalive rather than a frame.
pub fn is_keepalive(plaintext: &[u8]) -> bool {
    plaintext.starts_with(KEEPALIVE_TAG)
}

/// Keepalive payload: the tag followed by the sender's Unix ms clock.
pub fn keepalive_payload(timestamp_ms: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(KEEPALIVE_TAG.len() + 8);
    payload.extend_from_slice(KEEPALIVE_TAG);
    payload.extend_from_slice(&timestamp_ms.to_be_bytes());
    payload
}

/// Sender clock carried by a keepalive, if the payload is long enough.
pub fn keepalive_timestamp(plaintext: &[u8]) -> Option<u64> {
    let bytes = plaintext.strip_prefix(KEEPALIVE_TAG.as_slice())?.get(..8)?;
    Some(u64::from_be_bytes(bytes.try_into().ok()?))
}

/// Number of datagrams to emit for one packet.
///
/// The whole part of the multiplier is always sent; the fractional part is
/// the probability of one extra copy. A multiplier of 2.3 yields 2 copies
/// 70% of the time and 3 copies 30% of the time.
pub fn redundant_copies<R: Rng + ?Sized>(multiplier: f64, rng: &mut R) -> usize {
    let whole = multiplier.floor();
    let fraction = multiplier - whole;
    let mut copies = whole as usize;
    if fraction > 0.0 && rng.random::<f64>() < fraction {
        copies += 1;
    }
    copies
}

/// Seals frames and puts them on the wire.
pub(crate) struct Outbound {
    cipher: Arc<Cipher>,
    transport: Arc<Transport>,
    multiplier: f64,
    stats: Arc<SessionStats>,
}

impl Outbound {
    pub(crate) fn new(
        cipher: Arc<Cipher>,
        transport: Arc<Transport>,
        multiplier: f64,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            cipher,
            transport,
            multiplier,
            stats,
        }
    }

    /// Seal one plaintext and send it as many times as the multiplier says.
    ///
    /// All copies share one envelope, and so one IV, which is what lets the
    /// receiver recognize them as duplicates. Stops at the first failed
    /// copy. Returns the number of datagrams sent.
    pub(crate) async fn send(&self, plaintext: &[u8]) -> Result<usize, SessionError> {
        // ThreadRng is not Send; draw before the first await
        let copies = redundant_copies(self.multiplier, &mut rand::rng());

        if copies > 0 {
            let (envelope, _) = self.cipher.encrypt(plaintext)?;
            for _ in 0..copies {
                self.transport.send(&envelope).await?;
                self.stats.record_datagram();
            }
        }

        self.stats.record_tx(plaintext.len());
        trace!(len = plaintext.len(), copies, "Packet sent");
        Ok(copies)
    }
}

/// Send a keepalive every `interval` until shutdown.
///
/// Keepalives go through the regular send path, so they are multiplied like
/// data. The first one goes out immediately, which lets a server learn the
/// client's address before the client has any traffic.
pub(crate) async fn run_keepalive(outbound: Arc<Outbound>, interval: Duration, shutdown: Shutdown) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(interval_secs = interval.as_secs(), "Keepalive task starting");

    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = outbound.send(&keepalive_payload(now_ms())).await {
            if report(&e, "keepalive_send") == ErrorLevel::Fatal {
                shutdown.trigger();
                break;
            }
        }
    }

    debug!("Keepalive task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_keepalive_payload() {
        let payload = keepalive_payload(0x0102_0304_0506_0708);
        assert_eq!(&payload[..5], b"GOFER");
        assert_eq!(&payload[5..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(is_keepalive(&payload));
        assert!(is_keepalive(b"GOFER"));
        assert!(!is_keepalive(b"GOFE"));
        assert!(!is_keepalive(&[0x45, 0x00, 0x00, 0x54]));

        assert_eq!(keepalive_timestamp(&payload), Some(0x0102_0304_0506_0708));
        assert_eq!(keepalive_timestamp(b"GOFER"), None);
        assert_eq!(keepalive_timestamp(b"GOFER1234"), None);
        assert_eq!(keepalive_timestamp(&[0u8; 13]), None);
    }

    #[test]
    fn test_whole_multipliers_are_exact() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(redundant_copies(0.0, &mut rng), 0);
            assert_eq!(redundant_copies(1.0, &mut rng), 1);
            assert_eq!(redundant_copies(3.0, &mut rng), 3);
        }
    }

    #[test]
    fn test_fractional_multiplier_distribution() {
        let mut rng = StdRng::seed_from_u64(42);
        let trials = 10_000;
        let mut threes = 0;
        for _ in 0..trials {
            match redundant_copies(2.3, &mut rng) {
                2 => {}
                3 => threes += 1,
                n => panic!("unexpected copy count {}", n),
            }
        }
        // Expect about 3000
        assert!((2500..3500).contains(&threes), "threes = {}", threes);
    }

    #[test]
    fn test_fraction_below_one() {
        let mut rng = StdRng::seed_from_u64(1);
        let sent: usize = (0..1000).map(|_| redundant_copies(0.5, &mut rng)).sum();
        assert!((350..650).contains(&sent), "sent = {}", sent);
    }
}

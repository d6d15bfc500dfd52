//! Session traffic counters.
//!
//! Each direction only writes its own counters, so relaxed atomics are
//! enough; a snapshot taken while traffic flows may mix values from
//! adjacent packets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Live counters shared by the session's tasks.
#[derive(Debug, Default)]
pub struct SessionStats {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    tx_datagrams: AtomicU64,
    duplicates: AtomicU64,
    keepalives_rx: AtomicU64,
    last_rx_ms: AtomicU64,
    last_tx_ms: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Authenticated packets received (keepalives and duplicates included).
    pub rx_packets: u64,
    /// Plaintext bytes received.
    pub rx_bytes: u64,
    /// Logical packets sent.
    pub tx_packets: u64,
    /// Plaintext bytes sent, counted once per logical packet.
    pub tx_bytes: u64,
    /// Datagrams put on the wire, redundant copies included.
    pub tx_datagrams: u64,
    /// Received packets dropped as duplicates.
    pub duplicates: u64,
    /// Keepalives received.
    pub keepalives_rx: u64,
    /// Unix ms of the last authenticated receive (0 = never).
    pub last_rx_ms: u64,
    /// Unix ms of the last successful send (0 = never).
    pub last_tx_ms: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_rx(&self, bytes: usize) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.last_rx_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub(crate) fn record_tx(&self, bytes: usize) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.last_tx_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub(crate) fn record_datagram(&self) {
        self.tx_datagrams.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_keepalive(&self) {
        self.keepalives_rx.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_datagrams: self.tx_datagrams.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            keepalives_rx: self.keepalives_rx.load(Ordering::Relaxed),
            last_rx_ms: self.last_rx_ms.load(Ordering::Relaxed),
            last_tx_ms: self.last_tx_ms.load(Ordering::Relaxed),
        }
    }
}

/// Current time as Unix milliseconds.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

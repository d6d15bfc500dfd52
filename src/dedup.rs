//! Duplicate Register
//!
//! Time-windowed membership test over packet signatures. Redundant sends
//! and UDP retransmission artifacts can deliver the same envelope more than
//! once in a short span; the register lets the receive path drop the
//! repeats before they reach the interface.

use crate::cipher::Signature;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default duplicate detection window.
pub const DUPLICATE_WINDOW: Duration = Duration::from_secs(5);

/// Signature -> last-seen map with a sliding expiry window.
///
/// Entries not refreshed within the window are swept lazily, at most once
/// per window length, so memory stays bounded by the traffic of roughly
/// two windows.
#[derive(Debug)]
pub struct DuplicateRegister {
    window: Duration,
    seen: HashMap<Signature, Instant>,
    last_sweep: Option<Instant>,
}

impl DuplicateRegister {
    /// Create a register with the given detection window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
            last_sweep: None,
        }
    }

    /// Get the detection window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of tracked signatures (including not-yet-swept stale ones).
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if no signatures are tracked.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Check and record a signature at the current time.
    pub fn is_duplicate(&mut self, sig: Signature) -> bool {
        self.is_duplicate_at(sig, Instant::now())
    }

    /// Check and record a signature at an explicit time.
    ///
    /// Returns true if `sig` was last seen less than one window before
    /// `now`. Either way the signature's last-seen time becomes `now`.
    pub fn is_duplicate_at(&mut self, sig: Signature, now: Instant) -> bool {
        self.sweep(now);

        match self.seen.insert(sig, now) {
            Some(last_seen) => now.saturating_duration_since(last_seen) < self.window,
            None => false,
        }
    }

    /// Drop entries older than the window, if a sweep is due.
    fn sweep(&mut self, now: Instant) {
        match self.last_sweep {
            Some(last) if now.saturating_duration_since(last) < self.window => return,
            None => {
                self.last_sweep = Some(now);
                return;
            }
            _ => {}
        }

        let window = self.window;
        self.seen
            .retain(|_, last_seen| now.saturating_duration_since(*last_seen) < window);
        self.last_sweep = Some(now);
    }
}

impl Default for DuplicateRegister {
    fn default() -> Self {
        Self::new(DUPLICATE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(n: u8) -> Signature {
        Signature::from_bytes([n; 16])
    }

    #[test]
    fn test_first_seen_is_not_duplicate() {
        let mut register = DuplicateRegister::default();
        assert!(!register.is_duplicate(sig(1)));
        assert!(!register.is_duplicate(sig(2)));
        assert_eq!(register.len(), 2);
    }

    #[test]
    fn test_repeat_within_window_is_duplicate() {
        let mut register = DuplicateRegister::default();
        let t0 = Instant::now();

        assert!(!register.is_duplicate_at(sig(1), t0));
        assert!(register.is_duplicate_at(sig(1), t0 + Duration::from_secs(1)));
        assert!(register.is_duplicate_at(sig(1), t0 + Duration::from_millis(4999)));
    }

    #[test]
    fn test_repeat_after_window_is_not_duplicate() {
        let mut register = DuplicateRegister::default();
        let t0 = Instant::now();

        assert!(!register.is_duplicate_at(sig(1), t0));
        assert!(!register.is_duplicate_at(sig(1), t0 + Duration::from_secs(5)));
        assert!(register.is_duplicate_at(sig(1), t0 + Duration::from_secs(6)));
    }

    #[test]
    fn test_duplicate_refreshes_timestamp() {
        let mut register = DuplicateRegister::default();
        let t0 = Instant::now();

        assert!(!register.is_duplicate_at(sig(1), t0));
        assert!(register.is_duplicate_at(sig(1), t0 + Duration::from_secs(4)));
        // 8s after first sighting, but only 4s after the refresh
        assert!(register.is_duplicate_at(sig(1), t0 + Duration::from_secs(8)));
    }

    #[test]
    fn test_stale_entries_swept() {
        let mut register = DuplicateRegister::new(Duration::from_secs(1));
        let t0 = Instant::now();

        for n in 0..10 {
            register.is_duplicate_at(sig(n), t0);
        }
        assert_eq!(register.len(), 10);

        register.is_duplicate_at(sig(100), t0 + Duration::from_secs(2));
        assert_eq!(register.len(), 1);
    }

    #[test]
    fn test_fresh_entries_survive_sweep() {
        let mut register = DuplicateRegister::new(Duration::from_secs(2));
        let t0 = Instant::now();

        register.is_duplicate_at(sig(1), t0);
        register.is_duplicate_at(sig(2), t0 + Duration::from_secs(1));
        register.is_duplicate_at(sig(3), t0 + Duration::from_millis(2500));

        assert!(register.is_duplicate_at(sig(2), t0 + Duration::from_millis(2600)));
        assert!(!register.is_duplicate_at(sig(1), t0 + Duration::from_millis(2700)));
    }
}

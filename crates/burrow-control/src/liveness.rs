//! Per-peer liveness counter.
//!
//! Initialized to the configured maximum, decremented once per heartbeat
//! interval by the server's watcher task, and reset by the frame dispatcher
//! on any inbound frame from the peer. Hitting zero is terminal for the
//! peer record; a reconnecting peer gets a fresh counter.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Shared liveness counter clamped to `[0, max]`.
#[derive(Debug, Clone)]
pub struct Liveness {
    remaining: Arc<AtomicI64>,
    max: i64,
}

impl Liveness {
    pub fn new(max: u32) -> Self {
        let max = i64::from(max);
        Self {
            remaining: Arc::new(AtomicI64::new(max)),
            max,
        }
    }

    /// Any inbound frame from the peer restores the full budget.
    pub fn reset(&self) {
        self.remaining.store(self.max, Ordering::Relaxed);
    }

    /// One idle interval elapsed. Returns the remaining budget; zero means
    /// the peer is gone.
    pub fn tick(&self) -> i64 {
        self.remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some((v - 1).max(0))
            })
            .map(|prev| (prev - 1).max(0))
            .unwrap_or(0)
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_down_and_clamps_at_zero() {
        let liveness = Liveness::new(3);
        assert_eq!(liveness.remaining(), 3);
        assert_eq!(liveness.tick(), 2);
        assert_eq!(liveness.tick(), 1);
        assert_eq!(liveness.tick(), 0);
        assert_eq!(liveness.tick(), 0);
        assert_eq!(liveness.remaining(), 0);
    }

    #[test]
    fn reset_restores_full_budget() {
        let liveness = Liveness::new(5);
        liveness.tick();
        liveness.tick();
        liveness.reset();
        assert_eq!(liveness.remaining(), 5);
    }

    #[test]
    fn never_exceeds_max() {
        let liveness = Liveness::new(2);
        liveness.reset();
        liveness.reset();
        assert_eq!(liveness.remaining(), 2);
    }
}

//! In-flight request accounting behind the global busy indicator.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;
use tracing::warn;

/// Shared counter of requests currently in flight.
///
/// The busy stream flips to true on the first dispatch and back to
/// false when the last in-flight request completes, in any order. The
/// counter clamps at zero; an unbalanced end is a bug upstream, not a
/// reason to go negative.
#[derive(Debug)]
pub struct TrafficGauge {
    in_flight: AtomicUsize,
    busy_tx: watch::Sender<bool>,
}

impl TrafficGauge {
    pub fn new() -> Self {
        let (busy_tx, _) = watch::channel(false);
        Self {
            in_flight: AtomicUsize::new(0),
            busy_tx,
        }
    }

    /// Observe the busy indicator
    pub fn busy(&self) -> watch::Receiver<bool> {
        self.busy_tx.subscribe()
    }

    /// Number of requests currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Record a dispatch
    pub fn begin(&self) {
        let previous = self.in_flight.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            self.busy_tx.send_replace(true);
        }
    }

    /// Record a completion, success or failure
    pub fn end(&self) {
        match self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(1) => {
                // That was the last one
                self.busy_tx.send_replace(false);
            }
            Ok(_) => {}
            Err(_) => {
                warn!("Traffic gauge decremented below zero, clamping");
            }
        }
    }
}

impl Default for TrafficGauge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_tracks_first_and_last() {
        let gauge = TrafficGauge::new();
        let busy = gauge.busy();
        assert!(!*busy.borrow());

        gauge.begin();
        gauge.begin();
        assert!(*busy.borrow());
        assert_eq!(gauge.in_flight(), 2);

        gauge.end();
        assert!(*busy.borrow());
        gauge.end();
        assert!(!*busy.borrow());
        assert_eq!(gauge.in_flight(), 0);
    }

    #[test]
    fn test_clamped_at_zero() {
        let gauge = TrafficGauge::new();
        gauge.end();
        assert_eq!(gauge.in_flight(), 0);

        gauge.begin();
        assert!(*gauge.busy().borrow());
        gauge.end();
        assert!(!*gauge.busy().borrow());
    }
}

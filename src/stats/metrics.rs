//! Relay counters
//!
//! Process-wide totals updated from the ingest path and connection teardown,
//! read by the periodic reporter. All counters are monotonic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide relay counters
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Datagrams received (counted before decoding)
    pub received: AtomicU64,

    /// Datagrams that failed to decode
    pub malformed: AtomicU64,

    /// Per-subscriber enqueue failures (backpressure drops)
    pub dropped: AtomicU64,

    /// Queued events discarded when a subscriber was torn down
    pub discarded: AtomicU64,

    /// Subscriber connections accepted
    pub connections: AtomicU64,
}

impl RelayMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            connections: AtomicU64::new(0),
        }
    }

    /// Record a datagram arrival
    #[inline]
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a decode failure
    #[inline]
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record backpressure drops
    #[inline]
    pub fn record_dropped(&self, count: u64) {
        if count > 0 {
            self.dropped.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Record events discarded at teardown
    #[inline]
    pub fn record_discarded(&self, count: u64) {
        if count > 0 {
            self.discarded.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Record an accepted subscriber connection
    #[inline]
    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub malformed: u64,
    pub dropped: u64,
    pub discarded: u64,
    pub connections: u64,
}

impl MetricsSnapshot {
    /// Counter increase since an earlier snapshot
    pub fn delta(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.saturating_sub(earlier.received),
            malformed: self.malformed.saturating_sub(earlier.malformed),
            dropped: self.dropped.saturating_sub(earlier.dropped),
            discarded: self.discarded.saturating_sub(earlier.discarded),
            connections: self.connections.saturating_sub(earlier.connections),
        }
    }
}

/// Per-subscriber statistics, reported when the connection ends
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Events transmitted
    pub sent: u64,
    /// Events still queued at teardown
    pub discarded: u64,
    /// Pings answered
    pub probes_answered: u64,
    /// Connection duration
    pub duration: Duration,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Average delivery rate over the session (events/sec)
    pub fn send_rate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.sent as f64 / secs
        } else {
            0.0
        }
    }
}

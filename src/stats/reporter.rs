//! Periodic stats reporter
//!
//! Every `interval` the reporter samples the relay counters, the kernel drop
//! counter and the subscriber queues, and logs one summary line:
//!
//! ```text
//! Stats:  812.4 pkts/s | RX: 40620 | UDPdrop: 0/0 | WSdrop: 12/12 | Clients: 3 | QMax: 4000 | QPeak: 4000
//! ```
//!
//! `UDPdrop` and `WSdrop` are `interval/total`. `QMax` is the deepest queue at
//! sampling time; `QPeak` is the deepest any queue got during the interval.
//! The reporter only observes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::metrics::{MetricsSnapshot, RelayMetrics};
use super::os_drops::UdpDropCounter;
use crate::registry::{Subscriber, SubscriberRegistry};

/// Queue occupancy across subscribers at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueueDepths {
    pub subscribers: usize,
    pub max: usize,
    pub avg: f64,
    pub peak: usize,
}

impl QueueDepths {
    /// Sample current depths; also collects and resets each high-water mark
    pub fn sample(subscribers: &[Arc<Subscriber>]) -> Self {
        if subscribers.is_empty() {
            return Self::default();
        }

        let mut max = 0;
        let mut sum = 0;
        let mut peak = 0;
        for subscriber in subscribers {
            let depth = subscriber.queue_depth();
            max = max.max(depth);
            sum += depth;
            peak = peak.max(subscriber.take_peak_depth());
        }

        Self {
            subscribers: subscribers.len(),
            max,
            avg: sum as f64 / subscribers.len() as f64,
            peak,
        }
    }
}

/// One summary record
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub elapsed: Duration,
    pub rx_rate: f64,
    pub received_total: u64,
    pub malformed_interval: u64,
    pub udp_drops_interval: u64,
    pub udp_drops_total: u64,
    pub ws_drops_interval: u64,
    pub ws_drops_total: u64,
    pub discarded_total: u64,
    pub queues: QueueDepths,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stats: {:6.1} pkts/s | RX: {} | UDPdrop: {}/{} | WSdrop: {}/{} | Clients: {} | QMax: {} | QPeak: {}",
            self.rx_rate,
            self.received_total,
            self.udp_drops_interval,
            self.udp_drops_total,
            self.ws_drops_interval,
            self.ws_drops_total,
            self.queues.subscribers,
            self.queues.max,
            self.queues.peak,
        )
    }
}

/// Previous-interval state for rate computation
#[derive(Debug, Clone)]
pub struct MetricsWindow {
    at: Instant,
    last: MetricsSnapshot,
    last_os_drops: u64,
}

impl MetricsWindow {
    pub fn new(at: Instant, snapshot: MetricsSnapshot, os_drops: u64) -> Self {
        Self {
            at,
            last: snapshot,
            last_os_drops: os_drops,
        }
    }

    /// Build a report against the previous window and roll the window forward
    pub fn report(
        &mut self,
        at: Instant,
        snapshot: MetricsSnapshot,
        os_drops: u64,
        queues: QueueDepths,
    ) -> StatsReport {
        let elapsed = at.saturating_duration_since(self.at);
        let delta = snapshot.delta(&self.last);

        let secs = elapsed.as_secs_f64();
        let rx_rate = if secs > 0.0 {
            delta.received as f64 / secs
        } else {
            0.0
        };

        let report = StatsReport {
            elapsed,
            rx_rate,
            received_total: snapshot.received,
            malformed_interval: delta.malformed,
            udp_drops_interval: os_drops.saturating_sub(self.last_os_drops),
            udp_drops_total: os_drops,
            ws_drops_interval: delta.dropped,
            ws_drops_total: snapshot.dropped,
            discarded_total: snapshot.discarded,
            queues,
        };

        self.at = at;
        self.last = snapshot;
        self.last_os_drops = os_drops;

        report
    }
}

/// Background reporter task
pub struct StatsReporter {
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<RelayMetrics>,
    os_drops: UdpDropCounter,
    interval: Duration,
}

impl StatsReporter {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        metrics: Arc<RelayMetrics>,
        os_drops: UdpDropCounter,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            metrics,
            os_drops,
            interval,
        }
    }

    /// Sample everything once
    pub async fn sample(&self, window: &mut MetricsWindow) -> StatsReport {
        let os_drops = self.os_drops.read().await;
        let queues = QueueDepths::sample(&self.registry.snapshot());
        window.report(Instant::now(), self.metrics.snapshot(), os_drops, queues)
    }

    /// Report every interval until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        let mut window = MetricsWindow::new(
            Instant::now(),
            self.metrics.snapshot(),
            self.os_drops.read().await,
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.sample(&mut window).await;
            tracing::info!(
                target: "udp_ws_relay::stats",
                rx_rate = report.rx_rate,
                received = report.received_total,
                malformed = report.malformed_interval,
                ws_dropped = report.ws_drops_interval,
                discarded = report.discarded_total,
                queue_avg = report.queues.avg,
                "{}",
                report
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;
    use crate::event::SharedEvent;
    use crate::registry::DeliveryReceiver;

    fn subscriber(id: u64, capacity: usize) -> (Arc<Subscriber>, DeliveryReceiver) {
        let peer: SocketAddr = format!("10.0.0.{}:5000", id).parse().unwrap();
        Subscriber::new(id, peer, capacity, CancellationToken::new())
    }

    fn fill(subscriber: &Subscriber, count: usize) {
        let event =
            SharedEvent::from_datagram(br#"{"k":1}"#, 1024, subscriber.peer_addr().ip(), 0)
                .unwrap();
        for _ in 0..count {
            let _ = subscriber.try_enqueue(event.clone());
        }
    }

    #[test]
    fn test_queue_depths_empty() {
        assert_eq!(QueueDepths::sample(&[]), QueueDepths::default());
    }

    #[tokio::test]
    async fn test_queue_depths_max_avg_peak() {
        let (a, mut rx_a) = subscriber(1, 100);
        let (b, _rx_b) = subscriber(2, 100);
        fill(&a, 10);
        fill(&b, 4);
        for _ in 0..8 {
            rx_a.recv().await.unwrap();
        }

        let depths = QueueDepths::sample(&[a.clone(), b.clone()]);
        assert_eq!(depths.subscribers, 2);
        assert_eq!(depths.max, 4);
        assert_eq!(depths.avg, 3.0);
        assert_eq!(depths.peak, 10);

        // Peak resets after sampling
        let again = QueueDepths::sample(&[a, b]);
        assert_eq!(again.peak, 4);
    }

    #[test]
    fn test_window_rates_and_intervals() {
        let start = Instant::now();
        let mut window = MetricsWindow::new(start, MetricsSnapshot::default(), 2);

        let snapshot = MetricsSnapshot {
            received: 500,
            malformed: 3,
            dropped: 40,
            ..Default::default()
        };
        let report = window.report(
            start + Duration::from_secs(5),
            snapshot,
            7,
            QueueDepths::default(),
        );

        assert_eq!(report.rx_rate, 100.0);
        assert_eq!(report.received_total, 500);
        assert_eq!(report.malformed_interval, 3);
        assert_eq!(report.ws_drops_interval, 40);
        assert_eq!(report.udp_drops_interval, 5);
        assert_eq!(report.udp_drops_total, 7);

        let next = MetricsSnapshot {
            received: 600,
            malformed: 3,
            dropped: 45,
            ..Default::default()
        };
        let report = window.report(
            start + Duration::from_secs(10),
            next,
            7,
            QueueDepths::default(),
        );

        assert_eq!(report.rx_rate, 20.0);
        assert_eq!(report.ws_drops_interval, 5);
        assert_eq!(report.ws_drops_total, 45);
        assert_eq!(report.udp_drops_interval, 0);
    }

    #[test]
    fn test_window_zero_elapsed() {
        let start = Instant::now();
        let mut window = MetricsWindow::new(start, MetricsSnapshot::default(), 0);
        let report = window.report(
            start,
            MetricsSnapshot {
                received: 10,
                ..Default::default()
            },
            0,
            QueueDepths::default(),
        );

        assert_eq!(report.rx_rate, 0.0);
    }

    #[test]
    fn test_summary_line_format() {
        let report = StatsReport {
            elapsed: Duration::from_secs(5),
            rx_rate: 812.44,
            received_total: 40620,
            malformed_interval: 0,
            udp_drops_interval: 1,
            udp_drops_total: 9,
            ws_drops_interval: 12,
            ws_drops_total: 30,
            discarded_total: 0,
            queues: QueueDepths {
                subscribers: 3,
                max: 4000,
                avg: 1500.0,
                peak: 4000,
            },
        };

        assert_eq!(
            report.to_string(),
            "Stats:  812.4 pkts/s | RX: 40620 | UDPdrop: 1/9 | WSdrop: 12/30 | Clients: 3 | QMax: 4000 | QPeak: 4000"
        );
    }

    #[tokio::test]
    async fn test_sample_reads_registry_and_metrics() {
        let registry = Arc::new(SubscriberRegistry::new());
        let metrics = Arc::new(RelayMetrics::new());
        let (a, _rx) = subscriber(1, 10);
        registry.register(Arc::clone(&a)).await;
        fill(&a, 3);
        metrics.record_received();
        metrics.record_dropped(2);

        let reporter = StatsReporter::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            UdpDropCounter::disabled(),
            Duration::from_secs(5),
        );
        let mut window = MetricsWindow::new(Instant::now(), MetricsSnapshot::default(), 0);
        let report = reporter.sample(&mut window).await;

        assert_eq!(report.received_total, 1);
        assert_eq!(report.ws_drops_total, 2);
        assert_eq!(report.queues.subscribers, 1);
        assert_eq!(report.queues.max, 3);
    }
}

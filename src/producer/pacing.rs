//! Send pacing for producers
//!
//! [`ReplayPacer`] spaces out replayed log lines, either at a fixed rate or
//! following the `Uxt` timestamps recorded in the log. [`RatePacer`] keeps a
//! steady packets-per-second schedule for synthetic load.

use std::time::Duration;

use chrono::NaiveTime;
use tokio::time::Instant;

use crate::event::Record;

/// Key holding the `HH:MM:SS.mmm` log timestamp
pub const UXT_FIELD: &str = "Uxt";

/// Fixed-mode gap between lines
pub const FIXED_DELAY: Duration = Duration::from_millis(10);

/// Gaps at or above this are shortened to [`LONG_GAP_DELAY`]
pub const LONG_GAP: Duration = Duration::from_secs(10);

/// Delay used in place of a long gap
pub const LONG_GAP_DELAY: Duration = Duration::from_secs(1);

/// Highest rate [`RatePacer`] schedules
pub const MAX_PACKETS_PER_SECOND: u32 = 1_000_000;

/// Parse a `Uxt` value (`HH:MM:SS.mmm`)
pub fn parse_uxt(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M:%S%.f").ok()
}

/// Replay pacing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Constant delay between lines
    Fixed(Duration),
    /// Reproduce the recorded gaps between `Uxt` timestamps
    Realtime,
}

/// Computes the delay before each replayed record
#[derive(Debug, Clone)]
pub struct ReplayPacer {
    pacing: Pacing,
    previous: Option<NaiveTime>,
    started: bool,
}

impl ReplayPacer {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            pacing,
            previous: None,
            started: false,
        }
    }

    /// Delay to wait before sending `record`
    ///
    /// In realtime mode the reference timestamp only advances on records with
    /// a parsable `Uxt`; records without one are sent immediately.
    pub fn delay_before(&mut self, record: &Record) -> Duration {
        let first = !self.started;
        self.started = true;

        match self.pacing {
            Pacing::Fixed(delay) => {
                if first {
                    Duration::ZERO
                } else {
                    delay
                }
            }
            Pacing::Realtime => {
                let current = record
                    .get(UXT_FIELD)
                    .and_then(|v| v.as_str())
                    .and_then(parse_uxt);

                let delay = match (current, self.previous) {
                    (Some(current), Some(previous)) => gap_delay(current, previous),
                    _ => Duration::ZERO,
                };

                if current.is_some() {
                    self.previous = current;
                }
                delay
            }
        }
    }
}

fn gap_delay(current: NaiveTime, previous: NaiveTime) -> Duration {
    let gap_ms = current.signed_duration_since(previous).num_milliseconds();
    if gap_ms <= 0 {
        return Duration::ZERO;
    }

    let gap = Duration::from_millis(gap_ms as u64);
    if gap >= LONG_GAP {
        LONG_GAP_DELAY
    } else {
        gap
    }
}

/// Fixed packets-per-second schedule
///
/// Packet `n` is due `n / pps` seconds after the start, so a slow send is
/// caught up on rather than accumulated.
#[derive(Debug, Clone)]
pub struct RatePacer {
    start: Instant,
    interval: Duration,
    count: u64,
}

impl RatePacer {
    /// Rates above [`MAX_PACKETS_PER_SECOND`] are capped
    pub fn new(packets_per_second: u32) -> Self {
        Self {
            start: Instant::now(),
            interval: Duration::from_secs(1)
                / packets_per_second.clamp(1, MAX_PACKETS_PER_SECOND),
            count: 0,
        }
    }

    /// Packets accounted for so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Average rate since start
    pub fn average_rate(&self) -> f64 {
        let secs = self.start.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.count as f64 / secs
        } else {
            0.0
        }
    }

    /// Record one sent packet and return when the next one is due
    pub fn advance(&mut self) -> Instant {
        self.count += 1;
        let offset = self.interval.as_nanos().saturating_mul(u128::from(self.count));
        self.start + Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX))
    }

    /// Record one sent packet and sleep until the next one is due
    pub async fn tick(&mut self) {
        let due = self.advance();
        tokio::time::sleep_until(due).await;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn record(uxt: Option<&str>) -> Record {
        let mut record = Record::new();
        record.insert("Status".into(), Value::from("INFO"));
        if let Some(uxt) = uxt {
            record.insert(UXT_FIELD.into(), Value::from(uxt));
        }
        record
    }

    #[test]
    fn test_parse_uxt() {
        let time = parse_uxt("12:14:22.946").unwrap();
        assert_eq!(time, NaiveTime::from_hms_milli_opt(12, 14, 22, 946).unwrap());

        assert!(parse_uxt("not a time").is_none());
        assert!(parse_uxt("25:00:00.000").is_none());
    }

    #[test]
    fn test_fixed_pacing() {
        let mut pacer = ReplayPacer::new(Pacing::Fixed(FIXED_DELAY));

        assert_eq!(pacer.delay_before(&record(None)), Duration::ZERO);
        assert_eq!(pacer.delay_before(&record(None)), FIXED_DELAY);
        assert_eq!(pacer.delay_before(&record(Some("00:00:00.000"))), FIXED_DELAY);
    }

    #[test]
    fn test_realtime_follows_gaps() {
        let mut pacer = ReplayPacer::new(Pacing::Realtime);

        assert_eq!(pacer.delay_before(&record(Some("12:00:00.000"))), Duration::ZERO);
        assert_eq!(
            pacer.delay_before(&record(Some("12:00:00.250"))),
            Duration::from_millis(250)
        );
        assert_eq!(
            pacer.delay_before(&record(Some("12:00:02.250"))),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_realtime_long_gap_shortened() {
        let mut pacer = ReplayPacer::new(Pacing::Realtime);

        pacer.delay_before(&record(Some("12:00:00.000")));
        assert_eq!(
            pacer.delay_before(&record(Some("12:00:10.000"))),
            LONG_GAP_DELAY
        );
        assert_eq!(
            pacer.delay_before(&record(Some("13:00:10.000"))),
            LONG_GAP_DELAY
        );
    }

    #[test]
    fn test_realtime_backwards_or_equal_is_immediate() {
        let mut pacer = ReplayPacer::new(Pacing::Realtime);

        pacer.delay_before(&record(Some("12:00:05.000")));
        assert_eq!(pacer.delay_before(&record(Some("12:00:05.000"))), Duration::ZERO);
        assert_eq!(pacer.delay_before(&record(Some("12:00:01.000"))), Duration::ZERO);

        // Reference moved back to 12:00:01
        assert_eq!(
            pacer.delay_before(&record(Some("12:00:02.000"))),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_realtime_reference_skips_unparsable() {
        let mut pacer = ReplayPacer::new(Pacing::Realtime);

        pacer.delay_before(&record(Some("12:00:00.000")));
        assert_eq!(pacer.delay_before(&record(None)), Duration::ZERO);
        assert_eq!(pacer.delay_before(&record(Some("garbage"))), Duration::ZERO);
        assert_eq!(
            pacer.delay_before(&record(Some("12:00:00.500"))),
            Duration::from_millis(500)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_pacer_schedule() {
        let mut pacer = RatePacer::new(100);
        let start = Instant::now();

        for _ in 0..10 {
            pacer.tick().await;
        }

        assert_eq!(pacer.count(), 10);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[test]
    fn test_rate_pacer_deadlines() {
        let mut pacer = RatePacer::new(4);
        let start = pacer.start;

        assert_eq!(pacer.advance(), start + Duration::from_millis(250));
        assert_eq!(pacer.advance(), start + Duration::from_millis(500));
    }

    #[test]
    fn test_rate_pacer_keeps_advancing_past_u32_packets() {
        let mut pacer = RatePacer::new(MAX_PACKETS_PER_SECOND);
        let start = pacer.start;
        pacer.count = u64::from(u32::MAX) + 9;

        assert_eq!(
            pacer.advance(),
            start + Duration::from_micros(u64::from(u32::MAX) + 10)
        );
        assert_eq!(
            pacer.advance(),
            start + Duration::from_micros(u64::from(u32::MAX) + 11)
        );
    }

    #[test]
    fn test_rate_pacer_caps_rate() {
        let pacer = RatePacer::new(u32::MAX);
        assert_eq!(pacer.interval, Duration::from_micros(1));

        let pacer = RatePacer::new(0);
        assert_eq!(pacer.interval, Duration::from_secs(1));
    }
}

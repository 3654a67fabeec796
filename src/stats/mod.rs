//! Statistics and periodic reporting

pub mod metrics;
pub mod os_drops;
pub mod reporter;

pub use metrics::{MetricsSnapshot, RelayMetrics, SessionStats};
pub use os_drops::UdpDropCounter;
pub use reporter::{MetricsWindow, QueueDepths, StatsReport, StatsReporter};

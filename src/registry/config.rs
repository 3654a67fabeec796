//! Registry configuration

use std::time::Duration;

/// Default per-subscriber queue capacity (events)
pub const DEFAULT_QUEUE_CAPACITY: usize = 4000;

/// Default bound on waiting for a replaced subscriber to close
pub const DEFAULT_REPLACE_WAIT: Duration = Duration::from_secs(5);

/// Subscriber registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity of each subscriber's delivery queue
    pub queue_capacity: usize,

    /// How long `register` waits for a replaced subscriber to finish closing
    /// before inserting its successor anyway
    pub replace_wait: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            replace_wait: DEFAULT_REPLACE_WAIT,
        }
    }
}

impl RegistryConfig {
    /// Set the per-subscriber queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the replacement close wait
    pub fn replace_wait(mut self, wait: Duration) -> Self {
        self.replace_wait = wait;
        self
    }
}

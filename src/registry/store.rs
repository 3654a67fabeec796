//! Subscriber registry implementation
//!
//! The authoritative set of active subscribers plus the one-per-address map.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::config::RegistryConfig;
use super::subscriber::Subscriber;
use crate::session::state::TeardownReason;

/// Immutable view of the active subscribers
pub type Snapshot = Arc<Vec<Arc<Subscriber>>>;

/// Outcome of [`SubscriberRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// No subscriber was registered for this address
    New,
    /// An existing subscriber for this address was closed and replaced
    Replaced {
        /// Session ID of the replaced subscriber
        previous_session: u64,
        /// Whether the replaced connection finished closing within the wait bound
        closed_cleanly: bool,
    },
}

/// Central registry for all active subscribers
///
/// Mutations (register/deregister) are serialized by the exclusivity lock
/// around `by_address`. The broadcast step reads `active` through
/// [`snapshot`](Self::snapshot), which never touches that lock and never
/// suspends.
pub struct SubscriberRegistry {
    /// One subscriber per source address; doubles as the exclusivity lock
    by_address: Mutex<HashMap<IpAddr, Arc<Subscriber>>>,

    /// Copy-on-write list of active subscribers
    active: RwLock<Snapshot>,

    /// Configuration
    config: RegistryConfig,
}

impl SubscriberRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            by_address: Mutex::new(HashMap::new()),
            active: RwLock::new(Arc::new(Vec::new())),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a subscriber, replacing any existing one for the same address
    ///
    /// The whole sequence runs under the exclusivity lock: the previous
    /// subscriber is removed from both collections, told to close, and awaited
    /// (up to `replace_wait`) before the new one is inserted. Two subscribers
    /// for one address are therefore never reachable at the same time.
    pub async fn register(&self, subscriber: Arc<Subscriber>) -> Registration {
        let address = subscriber.address();
        let mut by_address = self.by_address.lock().await;

        let registration = match by_address.remove(&address) {
            Some(previous) => {
                self.remove_active(&previous);
                previous.close(TeardownReason::Replaced);

                let closed_cleanly =
                    tokio::time::timeout(self.config.replace_wait, previous.wait_closed())
                        .await
                        .is_ok();

                if !closed_cleanly {
                    tracing::warn!(
                        address = %address,
                        previous_session = previous.id(),
                        wait_ms = self.config.replace_wait.as_millis() as u64,
                        "Replaced subscriber did not close in time"
                    );
                }

                Registration::Replaced {
                    previous_session: previous.id(),
                    closed_cleanly,
                }
            }
            None => Registration::New,
        };

        by_address.insert(address, Arc::clone(&subscriber));
        self.insert_active(subscriber);

        registration
    }

    /// Remove a subscriber
    ///
    /// Always removes it from the active set. The address mapping is only
    /// cleared if it still points at this exact subscriber, so a stale
    /// deregister never evicts a newer connection. Returns true if anything
    /// was removed; calling it again is a no-op.
    pub async fn deregister(&self, subscriber: &Arc<Subscriber>) -> bool {
        let address = subscriber.address();
        let mut by_address = self.by_address.lock().await;

        let mut removed = false;
        if by_address
            .get(&address)
            .is_some_and(|current| Arc::ptr_eq(current, subscriber))
        {
            by_address.remove(&address);
            removed = true;
        }

        self.remove_active(subscriber) || removed
    }

    /// Current active subscribers
    #[inline]
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.active.read())
    }

    /// Number of active subscribers
    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    /// Whether there are no active subscribers
    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }

    /// Subscriber currently mapped to an address
    pub async fn lookup(&self, address: IpAddr) -> Option<Arc<Subscriber>> {
        self.by_address
            .lock()
            .await
            .get(&address.to_canonical())
            .cloned()
    }

    fn insert_active(&self, subscriber: Arc<Subscriber>) {
        let mut active = self.active.write();
        let mut next = Vec::with_capacity(active.len() + 1);
        next.extend(active.iter().cloned());
        next.push(subscriber);
        *active = Arc::new(next);
    }

    fn remove_active(&self, subscriber: &Arc<Subscriber>) -> bool {
        let mut active = self.active.write();
        if !active.iter().any(|s| Arc::ptr_eq(s, subscriber)) {
            return false;
        }

        let next: Vec<_> = active
            .iter()
            .filter(|s| !Arc::ptr_eq(s, subscriber))
            .cloned()
            .collect();
        *active = Arc::new(next);
        true
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

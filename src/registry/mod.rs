//! Subscriber registry
//!
//! The registry owns every active subscriber and enforces one subscriber per
//! source address. Registering a second connection from the same address
//! atomically closes and replaces the first.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<SubscriberRegistry>
//!                   ┌──────────────────────────────┐
//!                   │ by_address: Mutex<HashMap<   │  register / deregister
//!                   │   IpAddr, Arc<Subscriber>>>  │  (exclusivity lock)
//!                   │ active: RwLock<Arc<Vec<..>>> │  snapshot (lock-free read)
//!                   └──────────────┬───────────────┘
//!                                  │
//!          ┌───────────────────────┼───────────────────────┐
//!          ▼                       ▼                       ▼
//!    [Subscriber]            [Subscriber]            [Subscriber]
//!    mpsc::Sender            mpsc::Sender            mpsc::Sender
//!          │                       │                       │
//!          ▼                       ▼                       ▼
//!    WriterTask ──► WS       WriterTask ──► WS       WriterTask ──► WS
//! ```
//!
//! # Zero-Copy Fan-out
//!
//! Each event is serialized once into a [`SharedEvent`](crate::event::SharedEvent)
//! whose text buffer is reference-counted. Every queue holds a clone of the
//! same allocation.

pub mod config;
pub mod store;
pub mod subscriber;

pub use config::RegistryConfig;
pub use store::{Registration, Snapshot, SubscriberRegistry};
pub use subscriber::{DeliveryReceiver, EnqueueError, Subscriber};

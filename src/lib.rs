//! Best-effort UDP to WebSocket event relay
//!
//! Producers send one JSON object per UDP datagram. The relay stamps each
//! record with the sender's address and the receive time, serializes it once,
//! and pushes it to every connected WebSocket subscriber.
//!
//! - Ingest never waits on a subscriber. Each subscriber has a bounded queue;
//!   when it is full the event is dropped for that subscriber only.
//! - One subscriber per source IP. A reconnect from the same address closes
//!   and replaces the previous connection.
//! - Idle connections carry nothing but periodic pings. A subscriber that
//!   stops answering is disconnected.
//!
//! # Quick start
//!
//! ```no_run
//! use udp_ws_relay::{RelayConfig, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> udp_ws_relay::Result<()> {
//!     let server = RelayServer::new(RelayConfig::default());
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

pub mod error;
pub mod event;
pub mod producer;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use error::{Error, Result};
pub use event::SharedEvent;
pub use registry::{Subscriber, SubscriberRegistry};
pub use server::{RelayConfig, RelayServer};
pub use stats::{RelayMetrics, StatsReport};

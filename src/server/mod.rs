//! Relay server
//!
//! This module provides:
//! - UDP ingest with inline, non-blocking broadcast
//! - WebSocket subscriber connection handling
//! - The top-level server that wires ingest, subscribers and reporting

pub mod config;
pub mod connection;
pub mod ingest;
pub mod listener;

pub use config::RelayConfig;
pub use connection::Connection;
pub use ingest::{bind_udp, broadcast, BroadcastOutcome, IngestListener};
pub use listener::RelayServer;

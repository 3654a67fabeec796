//! Subscriber session
//!
//! Per-connection machinery: liveness state, the shared send lock, and the
//! writer and heartbeat tasks that run for each subscriber.

pub mod heartbeat;
pub mod sink;
pub mod state;
pub mod writer;

pub use heartbeat::HeartbeatTask;
pub use sink::SendLock;
pub use state::{Liveness, LivenessTracker, TeardownReason, TransportError};
pub use writer::{WriterExit, WriterReport, WriterTask};

//! Producer-side tooling
//!
//! This module provides:
//! - Parsing and reading of pipe-delimited log lines
//! - Replay and rate pacing
//! - A synthetic transaction-log generator
//! - A UDP emitter that sends one record per datagram

pub mod emitter;
pub mod generator;
pub mod logline;
pub mod pacing;

pub use emitter::UdpEmitter;
pub use generator::LoadGenerator;
pub use logline::{parse_line, LogReader};
pub use pacing::{Pacing, RatePacer, ReplayPacer};

//! Error types
//!
//! Only startup failures surface from the relay. Per-datagram and
//! per-subscriber failures are recovered where they happen and have their own
//! error types in [`crate::event`], [`crate::registry`] and [`crate::session`].

use std::net::SocketAddr;

/// Result type used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Relay error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to bind a listening socket
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Record could not be encoded
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn bind(addr: SocketAddr, source: std::io::Error) -> Self {
        Error::Bind { addr, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display() {
        let addr: SocketAddr = "127.0.0.1:20000".parse().unwrap();
        let err = Error::bind(
            addr,
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        );

        assert_eq!(err.to_string(), "failed to bind 127.0.0.1:20000: address in use");
    }

    #[test]
    fn test_config_error_display() {
        let err = Error::Config("queue capacity must be positive".into());
        assert_eq!(
            err.to_string(),
            "invalid configuration: queue capacity must be positive"
        );
    }
}

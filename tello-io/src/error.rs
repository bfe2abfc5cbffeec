//! Error types for tello-io

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// tello-io error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Local UDP port could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind
        addr: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Command transmission failed
    #[error("Send error: {0}")]
    Send(String),

    /// Control socket read or UTF-8 decode failed
    #[error("Receive error: {0}")]
    Receive(String),

    /// Capture handle could not be opened
    #[error("Stream open error: {0}")]
    StreamOpen(String),

    /// Video frame read failed
    #[error("Decode error: {0}")]
    Decode(String),

    /// A teardown step failed (logged, never aborts the remaining teardown)
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

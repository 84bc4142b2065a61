//! Error types for the shoreline server

use thiserror::Error;

/// Result type for shoreline operations
pub type Result<T> = std::result::Result<T, ShorelineError>;

/// Errors that can occur anywhere in the server
///
/// The variants follow the isolation rules of the server: a
/// `ProtocolViolation` or `Transport` error ends one connection,
/// `ResourceExhaustion` aborts only the operation that allocated,
/// and `Configuration` stops the process before it starts listening.
#[derive(Debug, Error)]
pub enum ShorelineError {
    /// Allocation of a canvas, shard or ring buffer failed
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(&'static str),

    /// Client sent abusive or unparseable input
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),

    /// Socket read/write/accept failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Operation was cancelled via CancellationToken
    #[error("operation cancelled")]
    Cancelled,
}

impl ShorelineError {
    /// Create a configuration error from anything printable
    pub fn config(msg: impl Into<String>) -> Self {
        ShorelineError::Configuration(msg.into())
    }

    /// Whether this error should end only the current connection
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            ShorelineError::ProtocolViolation(_)
                | ShorelineError::Transport(_)
                | ShorelineError::Cancelled
        )
    }
}

/// Input that makes the server drop a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A run of non-whitespace bytes exceeded the garbage bound
    #[error("garbage token of {len} bytes exceeds limit of {limit}")]
    GarbageTokenTooLong { len: usize, limit: usize },

    /// A single command does not fit into the receive ring
    #[error("command larger than receive buffer ({capacity} bytes)")]
    CommandTooLong { capacity: usize },
}

/// Errors from ring buffer operations
///
/// Ring operations never complete partially: they either move the
/// whole requested range or fail with one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// Fewer bytes are available than were requested
    #[error("ring holds {available} bytes, {requested} requested")]
    InsufficientData { requested: usize, available: usize },

    /// Not enough free space for the write
    #[error("ring has {free} bytes free, {requested} requested")]
    InsufficientSpace { requested: usize, free: usize },
}

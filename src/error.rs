//! Error types for spawnpool.

use thiserror::Error;

/// Main error type for spawnpool.
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The pool was not fully configured before `run`.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pipes or worker processes could not be created.
    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    /// A peer violated the wire protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer closed its end of a pipe.
    #[error("Channel closed by peer")]
    ChannelClosed,

    /// A completion notification named a process the dispatcher never spawned.
    #[error("Received unknown worker pid {0}")]
    UnknownWorker(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A payload could not be serialized into a frame.
    #[error("Payload encoding error: {0}")]
    Payload(#[from] bincode::Error),
}

impl SpawnError {
    /// Everything except configuration errors leaves the protocol in an
    /// unknown state and must bring the process down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

/// Result type alias for spawnpool operations.
pub type Result<T> = std::result::Result<T, SpawnError>;

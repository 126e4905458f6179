//! Error types for the task synchronization engine.

/// Top-level error type for the sync engine.
///
/// Nothing in this crate treats these as fatal to the process: the poller
/// folds every failure into the cached snapshot and retries on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Configuration could not be loaded, parsed, or saved.
    #[error("config error: {0}")]
    Config(String),

    /// Persisted cache read/write failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Remote Download Station call failed at the transport or API layer.
    #[error("remote error: {0}")]
    Remote(String),

    /// A pause/resume/delete/create request was rejected.
    #[error("mutation error: {0}")]
    Mutation(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Host command payload did not match the message contract.
    #[error("contract error: {0}")]
    Contract(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SyncError>;

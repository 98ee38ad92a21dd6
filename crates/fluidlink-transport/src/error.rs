use std::path::PathBuf;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the device at the specified path.
    #[error("failed to open {path}: {message}")]
    Open { path: PathBuf, message: String },

    /// No device matched the requested serial number.
    #[error("no device found with serial number {0}")]
    NotFound(String),

    /// An I/O error occurred on the byte stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer bytes were delivered than were reported available.
    #[error("short read ({actual} of {expected} bytes)")]
    ShortRead { expected: usize, actual: usize },

    /// The transport has been closed.
    #[error("transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

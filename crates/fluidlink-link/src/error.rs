use crate::engine::CommandFailure;

/// Errors that can occur in link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] fluidlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] fluidlink_frame::FrameError),

    /// A command is still awaiting acknowledgment.
    #[error("command {0} is still outstanding")]
    Busy(u16),

    /// A failed command has not been acknowledged yet.
    #[error("unacknowledged command failure: {0}")]
    UnacknowledgedFailure(CommandFailure),

    /// A lock around shared link state was poisoned.
    #[error("link state poisoned: {0}")]
    Poisoned(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;

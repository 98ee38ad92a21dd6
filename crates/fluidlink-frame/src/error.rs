/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffer is not exactly one frame long.
    #[error("invalid frame length ({actual} bytes, expected {expected})")]
    InvalidLength { expected: usize, actual: usize },

    /// The buffer is not a whole number of frames.
    #[error("buffer of {len} bytes is not a multiple of the {frame_len}-byte frame")]
    NotFrameMultiple { len: usize, frame_len: usize },

    /// The trailing checksum does not match the preceding bytes.
    #[error("checksum mismatch (computed 0x{computed:02x}, received 0x{received:02x})")]
    ChecksumMismatch { computed: u8, received: u8 },

    /// Reserved command bytes carry data.
    #[error("reserved command bytes must be zero")]
    ReservedNotZero,

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] fluidlink_transport::TransportError),

    /// An I/O error occurred in a stream codec.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;

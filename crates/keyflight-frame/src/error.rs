/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The first field of a frame is not a non-negative integer id.
    #[error("invalid command id: {0:?}")]
    InvalidCommandId(String),

    /// The frame contained nothing but whitespace.
    #[error("empty frame")]
    EmptyFrame,

    /// The receive buffer grew past its configured cap without a separator.
    #[error("receive buffer overflow ({size} bytes, max {max})")]
    BufferOverflow { size: usize, max: usize },

    /// An I/O error occurred while reading or writing commands.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

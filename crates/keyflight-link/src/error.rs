use std::time::Duration;

/// Errors that can occur in link operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] keyflight_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] keyflight_frame::FrameError),

    /// The operation needs an open, handshaken link.
    #[error("not connected")]
    NotConnected,

    /// A connection attempt is in flight or a link is already established.
    #[error("session busy: already connecting or connected")]
    Busy,

    /// The link dropped while waiting for device identity.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A bounded wait elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The session was closed while the operation was in flight.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A module descriptor failed validation.
    #[error("invalid module: {0}")]
    InvalidModule(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the named port.
    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        source: serialport::Error,
    },

    /// The port opened but could not be configured (control lines, timeouts).
    #[error("failed to configure {port}: {source}")]
    Configure {
        port: String,
        source: serialport::Error,
    },

    /// Failed to enumerate available ports.
    #[error("failed to enumerate ports: {0}")]
    Enumerate(serialport::Error),

    /// An I/O error occurred on the stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream is not open.
    #[error("port {0} is not open")]
    NotOpen(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

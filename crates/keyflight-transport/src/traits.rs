use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Default baud rate of the KeyFlight firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Data-available notification.
///
/// Invoked on the transport's own thread whenever new bytes can be pulled
/// with [`ByteStream::read_available`]. The callback must not block for long:
/// the next chunk is not delivered until it returns.
pub type DataListener = Arc<dyn Fn() + Send + Sync>;

/// A duplex byte stream to a device.
///
/// Implementations use interior mutability so one stream can be shared
/// between the command channel (reads) and callers (writes, close).
pub trait ByteStream: Send + Sync {
    /// Endpoint name for diagnostics (e.g. `/dev/ttyACM0`, `COM3`).
    fn name(&self) -> &str;

    /// Open the underlying endpoint. Opening an open stream is a no-op.
    fn open(&self) -> Result<()>;

    /// Whether the stream is currently open.
    fn is_open(&self) -> bool;

    /// Close the stream. Closing a closed stream is a no-op.
    fn close(&self) -> Result<()>;

    /// Write all of `data` (blocking, bounded by the write timeout).
    fn write(&self, data: &[u8]) -> Result<()>;

    /// Pull every byte received since the last call.
    ///
    /// Returns an empty vector when nothing is pending.
    fn read_available(&self) -> Result<Vec<u8>>;

    /// Install or remove the data-available listener.
    fn set_data_listener(&self, listener: Option<DataListener>);

    /// Line terminator appended after every outgoing command.
    fn line_terminator(&self) -> &str {
        "\n"
    }
}

impl std::fmt::Debug for dyn ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("name", &self.name())
            .field("open", &self.is_open())
            .finish()
    }
}

/// Settings applied when a stream is opened.
#[derive(Debug, Clone)]
pub struct PortSettings {
    /// Baud rate. Default: 115200.
    pub baud_rate: u32,
    /// Upper bound for a single blocking read. Default: 2 s.
    pub read_timeout: Duration,
    /// Upper bound for a single write. Default: 2 s.
    pub write_timeout: Duration,
    /// How often the reader thread wakes to check for shutdown. Default: 50 ms.
    pub poll_interval: Duration,
    /// Assert DTR and RTS after opening. The Arduino bootloader resets on
    /// these lines, so the device reboots on every open. Default: true.
    pub reset_lines: bool,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
            reset_lines: true,
        }
    }
}

/// Builds unopened streams for endpoint identifiers.
pub trait StreamFactory: Send + Sync {
    /// Create a stream for `endpoint`. The stream is not opened yet.
    fn create(&self, endpoint: &str, settings: &PortSettings) -> Arc<dyn ByteStream>;
}

impl<F> StreamFactory for F
where
    F: Fn(&str, &PortSettings) -> Arc<dyn ByteStream> + Send + Sync,
{
    fn create(&self, endpoint: &str, settings: &PortSettings) -> Arc<dyn ByteStream> {
        self(endpoint, settings)
    }
}

//! Duplex byte-stream abstraction for KeyFlight devices.
//!
//! Provides a unified interface over the links a configurator talks to:
//! - Serial ports (USB CDC / FTDI adapters on the Arduino side)
//! - An in-memory pair for loopback and simulated devices
//!
//! This is the lowest layer of keyflight. Everything else builds on top of
//! the [`ByteStream`] trait provided here.

pub mod error;
pub mod memory;
pub mod serial;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::{MemoryDevice, MemoryStream};
pub use serial::{available_ports, PortInfo, SerialFactory, SerialStream};
pub use traits::{ByteStream, DataListener, PortSettings, StreamFactory, DEFAULT_BAUD_RATE};

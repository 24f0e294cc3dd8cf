use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use bytes::{Buf, BytesMut};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{ByteStream, DataListener};

/// Host side of an in-memory link.
///
/// Behaves like a serial port whose far end is a [`MemoryDevice`]. Useful for
/// loopback setups and for driving the protocol against a simulated device.
pub struct MemoryStream {
    name: String,
    shared: Arc<Shared>,
}

/// Device side of an in-memory link.
///
/// `Read` yields what the host wrote and blocks until more arrives; it returns
/// EOF once the host closes. `Write` delivers bytes to the host and fires the
/// host's data listener on the calling thread. Clones share the same link.
#[derive(Clone)]
pub struct MemoryDevice {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    readable: Condvar,
}

#[derive(Default)]
struct State {
    open: bool,
    hung_up: bool,
    to_host: BytesMut,
    to_device: BytesMut,
    bytes_written: usize,
    writes_left: Option<usize>,
    listener: Option<DataListener>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryStream {
    /// Create a connected pair. The host side starts closed.
    pub fn pair(name: impl Into<String>) -> (Self, MemoryDevice) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                name: name.into(),
                shared: Arc::clone(&shared),
            },
            MemoryDevice { shared },
        )
    }

    /// Let `n` more writes succeed, then fail every write with `BrokenPipe`.
    pub fn fail_writes_after(&self, n: usize) {
        self.shared.lock().writes_left = Some(n);
    }

    /// Total bytes the host has successfully written.
    pub fn bytes_written(&self) -> usize {
        self.shared.lock().bytes_written
    }
}

impl ByteStream for MemoryStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<()> {
        let mut state = self.shared.lock();
        state.open = true;
        state.hung_up = false;
        debug!(port = %self.name, "memory stream opened");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.lock().open
    }

    fn close(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.open {
            debug!(port = %self.name, "memory stream closed");
        }
        state.open = false;
        state.hung_up = true;
        self.shared.readable.notify_all();
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        let mut state = self.shared.lock();
        if !state.open {
            return Err(TransportError::NotOpen(self.name.clone()));
        }
        if let Some(left) = state.writes_left.as_mut() {
            if *left == 0 {
                return Err(std::io::Error::new(
                    ErrorKind::BrokenPipe,
                    "simulated write failure",
                )
                .into());
            }
            *left -= 1;
        }
        state.to_device.extend_from_slice(data);
        state.bytes_written += data.len();
        self.shared.readable.notify_all();
        Ok(())
    }

    fn read_available(&self) -> Result<Vec<u8>> {
        Ok(self.shared.lock().to_host.split().to_vec())
    }

    fn set_data_listener(&self, listener: Option<DataListener>) {
        self.shared.lock().listener = listener;
    }
}

impl std::fmt::Debug for MemoryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStream")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}

impl MemoryDevice {
    /// Whether the host side is open.
    pub fn is_host_open(&self) -> bool {
        self.shared.lock().open
    }
}

impl Read for MemoryDevice {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.lock();
        loop {
            if !state.to_device.is_empty() {
                let n = buf.len().min(state.to_device.len());
                buf[..n].copy_from_slice(&state.to_device[..n]);
                state.to_device.advance(n);
                return Ok(n);
            }
            if state.hung_up {
                return Ok(0);
            }
            state = self
                .shared
                .readable
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Write for MemoryDevice {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let listener = {
            let mut state = self.shared.lock();
            if !state.open {
                // Nobody is listening; the bytes are lost like on a real wire.
                return Ok(buf.len());
            }
            state.to_host.extend_from_slice(buf);
            state.listener.clone()
        };
        if let Some(listener) = listener {
            listener();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

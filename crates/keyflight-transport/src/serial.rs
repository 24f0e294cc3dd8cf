use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use bytes::BytesMut;
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::traits::{ByteStream, DataListener, PortSettings, StreamFactory};

const READ_CHUNK_SIZE: usize = 1024;

/// Serial port stream.
///
/// Incoming bytes are collected by a dedicated reader thread and announced
/// through the data listener; callers pull them with `read_available`.
/// Writes go straight to the port from the caller's thread.
pub struct SerialStream {
    port_name: String,
    settings: PortSettings,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    reader: Mutex<Option<ReaderHandle>>,
    shared: Arc<ReaderShared>,
}

struct ReaderHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

#[derive(Default)]
struct ReaderShared {
    open: AtomicBool,
    pending: Mutex<BytesMut>,
    fault: Mutex<Option<std::io::Error>>,
    listener: Mutex<Option<DataListener>>,
}

impl ReaderShared {
    fn notify(&self) {
        let listener = lock(&self.listener).clone();
        if let Some(listener) = listener {
            listener();
        }
    }
}

impl SerialStream {
    /// Create an unopened stream for `port_name`.
    pub fn new(port_name: impl Into<String>, settings: PortSettings) -> Self {
        Self {
            port_name: port_name.into(),
            settings,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            shared: Arc::new(ReaderShared::default()),
        }
    }

    /// Settings this stream opens with.
    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    fn configure_err(&self, source: serialport::Error) -> TransportError {
        TransportError::Configure {
            port: self.port_name.clone(),
            source,
        }
    }
}

impl ByteStream for SerialStream {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn open(&self) -> Result<()> {
        let mut writer = lock(&self.writer);
        if writer.is_some() {
            return Ok(());
        }

        let mut port = serialport::new(&self.port_name, self.settings.baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(self.settings.write_timeout)
            .open()
            .map_err(|source| TransportError::Open {
                port: self.port_name.clone(),
                source,
            })?;

        if self.settings.reset_lines {
            port.write_data_terminal_ready(true)
                .map_err(|e| self.configure_err(e))?;
            port.write_request_to_send(true)
                .map_err(|e| self.configure_err(e))?;
        }

        let mut rx_port = port.try_clone().map_err(|e| self.configure_err(e))?;
        rx_port
            .set_timeout(self.settings.poll_interval.min(self.settings.read_timeout))
            .map_err(|e| self.configure_err(e))?;

        lock(&self.shared.pending).clear();
        lock(&self.shared.fault).take();
        self.shared.open.store(true, Ordering::SeqCst);

        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let shared = Arc::clone(&self.shared);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name(format!("keyflight-rx {}", self.port_name))
                .spawn(move || read_loop(rx_port, shared, stop))
                .inspect_err(|_| self.shared.open.store(false, Ordering::SeqCst))?
        };

        *lock(&self.reader) = Some(ReaderHandle { stop, thread });
        *writer = Some(port);

        info!(
            port = %self.port_name,
            baud = self.settings.baud_rate,
            "serial port opened"
        );
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<()> {
        self.shared.open.store(false, Ordering::SeqCst);

        if let Some(handle) = lock(&self.reader).take() {
            handle.stop.store(true, Ordering::SeqCst);
            // Closing from inside a data listener runs on the reader thread itself.
            if handle.thread.thread().id() != std::thread::current().id() {
                let _ = handle.thread.join();
            }
        }

        if lock(&self.writer).take().is_some() {
            debug!(port = %self.port_name, "serial port closed");
        }
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        let mut guard = lock(&self.writer);
        let port = guard
            .as_mut()
            .ok_or_else(|| TransportError::NotOpen(self.port_name.clone()))?;

        let mut offset = 0usize;
        while offset < data.len() {
            match port.write(&data[offset..]) {
                Ok(0) => return Err(std::io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        loop {
            match port.flush() {
                Ok(()) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        trace!(port = %self.port_name, bytes = data.len(), "wrote");
        Ok(())
    }

    fn read_available(&self) -> Result<Vec<u8>> {
        if let Some(err) = lock(&self.shared.fault).take() {
            return Err(TransportError::Io(err));
        }
        Ok(lock(&self.shared.pending).split().to_vec())
    }

    fn set_data_listener(&self, listener: Option<DataListener>) {
        *lock(&self.shared.listener) = listener;
    }
}

impl Drop for SerialStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialStream")
            .field("port", &self.port_name)
            .field("baud_rate", &self.settings.baud_rate)
            .field("open", &self.is_open())
            .finish()
    }
}

fn read_loop(mut port: Box<dyn SerialPort>, shared: Arc<ReaderShared>, stop: Arc<AtomicBool>) {
    debug!("reader thread started");
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    while !stop.load(Ordering::SeqCst) {
        match port.read(&mut chunk) {
            Ok(0) => continue,
            Ok(n) => {
                lock(&shared.pending).extend_from_slice(&chunk[..n]);
                shared.notify();
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock
                ) =>
            {
                continue;
            }
            Err(err) => {
                warn!(error = %err, "serial read failed; stopping reader");
                *lock(&shared.fault) = Some(err);
                shared.open.store(false, Ordering::SeqCst);
                shared.notify();
                break;
            }
        }
    }

    debug!("reader thread stopped");
}

/// Builds [`SerialStream`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialFactory;

impl StreamFactory for SerialFactory {
    fn create(&self, endpoint: &str, settings: &PortSettings) -> Arc<dyn ByteStream> {
        Arc::new(SerialStream::new(endpoint, settings.clone()))
    }
}

/// An available serial endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub kind: &'static str,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

/// List serial ports present on this machine.
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(TransportError::Enumerate)?;
    Ok(ports.into_iter().map(port_info).collect())
}

fn port_info(port: serialport::SerialPortInfo) -> PortInfo {
    let mut info = PortInfo {
        name: port.port_name,
        kind: "unknown",
        vid: None,
        pid: None,
        manufacturer: None,
        product: None,
        serial_number: None,
    };
    match port.port_type {
        SerialPortType::UsbPort(usb) => {
            info.kind = "usb";
            info.vid = Some(usb.vid);
            info.pid = Some(usb.pid);
            info.manufacturer = usb.manufacturer;
            info.product = usb.product;
            info.serial_number = usb.serial_number;
        }
        SerialPortType::PciPort => info.kind = "pci",
        SerialPortType::BluetoothPort => info.kind = "bluetooth",
        SerialPortType::Unknown => {}
    }
    info
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

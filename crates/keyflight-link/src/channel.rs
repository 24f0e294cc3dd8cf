use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, ThreadId};

use bytes::BytesMut;
use keyflight_frame::{decode_frame, encode_command, Command, CommandId, FrameConfig, FrameDecoder};
use keyflight_transport::{ByteStream, DataListener};
use tracing::{debug, trace, warn};

use crate::error::{LinkError, Result};
use crate::events::{lock, Dispatcher, Subscription};

/// Where an error event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    /// A frame could not be decoded; the frame was dropped.
    Decode,
    /// The device reported an error frame.
    Device,
    /// Reading from the transport failed.
    Transport,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Decode => "decode",
            Self::Device => "device",
            Self::Transport => "transport",
        })
    }
}

/// Event delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Any command other than debug or error.
    Command(Command),
    /// Debug text: received debug frames and a copy of every transmitted frame.
    Debug(String),
    /// Something went wrong with one frame or with the transport.
    Error {
        source: ErrorSource,
        message: String,
    },
}

/// Bridges a byte stream to typed command events.
///
/// Clones share the same underlying channel. Incoming chunks are decoded and
/// dispatched on the transport's notification thread, one chunk at a time.
#[derive(Clone)]
pub struct CommandChannel {
    shared: Arc<ChannelShared>,
}

struct ChannelShared {
    stream: Arc<dyn ByteStream>,
    decoder: Mutex<FrameDecoder>,
    /// Threads currently delivering events, inbound or outbound.
    delivering: Mutex<Vec<ThreadId>>,
    delivered: Condvar,
    events: Dispatcher<ChannelEvent>,
    closed: AtomicBool,
}

/// Registers the current thread as delivering events until dropped.
struct Delivery<'a> {
    shared: &'a ChannelShared,
    thread: ThreadId,
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        let mut delivering = lock(&self.shared.delivering);
        if let Some(index) = delivering.iter().position(|t| *t == self.thread) {
            delivering.swap_remove(index);
        }
        drop(delivering);
        self.shared.delivered.notify_all();
    }
}

impl CommandChannel {
    /// Attach to `stream` with an unbounded receive buffer.
    pub fn new(stream: Arc<dyn ByteStream>) -> Self {
        Self::with_config(stream, FrameConfig::default())
    }

    /// Attach to `stream` with explicit frame configuration.
    pub fn with_config(stream: Arc<dyn ByteStream>, config: FrameConfig) -> Self {
        let shared = Arc::new(ChannelShared {
            stream,
            decoder: Mutex::new(FrameDecoder::with_config(config)),
            delivering: Mutex::new(Vec::new()),
            delivered: Condvar::new(),
            events: Dispatcher::new(),
            closed: AtomicBool::new(false),
        });

        let weak: Weak<ChannelShared> = Arc::downgrade(&shared);
        let listener: DataListener = Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.on_data();
            }
        });
        shared.stream.set_data_listener(Some(listener));
        debug!(port = shared.stream.name(), "command channel attached");

        Self { shared }
    }

    /// Register a handler for every event this channel dispatches.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(handler)
    }

    /// Whether the channel is attached and its transport is open.
    pub fn is_connected(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst) && self.shared.stream.is_open()
    }

    /// Encode and send a command built from `id` and `args`.
    pub fn send<S: AsRef<str>>(&self, id: CommandId, args: &[S]) -> Result<()> {
        let command = Command::new(id, args.iter().map(|arg| arg.as_ref().to_string()));
        self.send_command(&command)
    }

    /// Encode and send a command.
    ///
    /// Fails with [`LinkError::NotConnected`] before writing anything when
    /// the channel is closed or the transport is not open.
    pub fn send_command(&self, command: &Command) -> Result<()> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }

        let stream = &self.shared.stream;
        let mut buf = BytesMut::new();
        encode_command(command, stream.line_terminator(), &mut buf);
        stream.write(&buf)?;

        trace!(port = stream.name(), frame = %command, "tx");
        if let Some(_delivery) = self.shared.deliver() {
            self.shared.emit(ChannelEvent::Debug(format!("TX: {command}")));
        }
        Ok(())
    }

    /// Detach from the transport. No event is dispatched after this returns,
    /// including the `TX:` echo of a send racing on another thread.
    ///
    /// The transport itself is left open; closing it is the owner's job.
    /// Safe to call repeatedly and from inside an event handler.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.stream.set_data_listener(None);
        self.shared.wait_for_deliveries();
        debug!(port = self.shared.stream.name(), "command channel detached");
    }

    /// Whether [`CommandChannel::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// The transport this channel is attached to.
    pub fn stream(&self) -> &Arc<dyn ByteStream> {
        &self.shared.stream
    }
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel")
            .field("port", &self.shared.stream.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ChannelShared {
    fn emit(&self, event: ChannelEvent) {
        if !self.closed.load(Ordering::SeqCst) {
            self.events.emit(&event);
        }
    }

    /// Register the current thread as delivering, unless already closed.
    fn deliver(&self) -> Option<Delivery<'_>> {
        let mut delivering = lock(&self.delivering);
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let current = thread::current().id();
        delivering.push(current);
        Some(Delivery {
            shared: self,
            thread: current,
        })
    }

    /// Block until no thread other than the caller is delivering.
    fn wait_for_deliveries(&self) {
        let current = thread::current().id();
        let mut delivering = lock(&self.delivering);
        while delivering.iter().any(|t| *t != current) {
            delivering = self
                .delivered
                .wait(delivering)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn on_data(&self) {
        let Some(_delivery) = self.deliver() else {
            return;
        };
        let mut decoder = lock(&self.decoder);

        match self.stream.read_available() {
            Ok(chunk) => {
                decoder.extend(&chunk);
                loop {
                    match decoder.next_frame() {
                        Ok(Some(frame)) => self.route(&frame),
                        Ok(None) => break,
                        Err(err) => {
                            warn!(port = self.stream.name(), error = %err, "receive buffer dropped");
                            self.emit(ChannelEvent::Error {
                                source: ErrorSource::Decode,
                                message: err.to_string(),
                            });
                        }
                    }
                }
            }
            Err(err) => {
                warn!(port = self.stream.name(), error = %err, "data receive error");
                self.emit(ChannelEvent::Error {
                    source: ErrorSource::Transport,
                    message: format!("data receive error: {err}"),
                });
            }
        }
    }

    fn route(&self, frame: &str) {
        trace!(port = self.stream.name(), frame, "rx");
        let command = match decode_frame(frame) {
            Ok(command) => command,
            Err(err) => {
                warn!(port = self.stream.name(), frame, error = %err, "dropping undecodable frame");
                self.emit(ChannelEvent::Error {
                    source: ErrorSource::Decode,
                    message: format!("failed to decode {frame:?}: {err}"),
                });
                return;
            }
        };

        match command.id {
            CommandId::DEBUG => {
                if !command.args.is_empty() {
                    self.emit(ChannelEvent::Debug(command.text()));
                }
            }
            CommandId::ERROR => {
                if !command.args.is_empty() {
                    let message = command.text();
                    warn!(port = self.stream.name(), %message, "device reported an error");
                    self.emit(ChannelEvent::Error {
                        source: ErrorSource::Device,
                        message,
                    });
                }
            }
            _ => self.emit(ChannelEvent::Command(command)),
        }
    }
}

impl Drop for ChannelShared {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            self.stream.set_data_listener(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::mpsc;
    use std::time::Duration;

    use keyflight_transport::{MemoryDevice, MemoryStream};

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    fn open_pair() -> (Arc<MemoryStream>, MemoryDevice, CommandChannel) {
        let (stream, device) = MemoryStream::pair("mem0");
        let stream = Arc::new(stream);
        stream.open().expect("memory stream should open");
        let channel = CommandChannel::new(stream.clone());
        (stream, device, channel)
    }

    fn collect(channel: &CommandChannel) -> (Subscription, mpsc::Receiver<ChannelEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let sub = channel.subscribe(move |event| {
            let _ = lock(&tx).send(event.clone());
        });
        (sub, rx)
    }

    #[test]
    fn routes_commands_debug_and_errors() {
        let (_stream, mut device, channel) = open_pair();
        let (_sub, rx) = collect(&channel);

        device
            .write_all(b"12,KeyFlight Mega v1.0.0 ready;\n7,3,1;\n11,Invalid module type;\n")
            .expect("device write should succeed");

        assert_eq!(
            rx.recv_timeout(WAIT).expect("debug event"),
            ChannelEvent::Debug("KeyFlight Mega v1.0.0 ready".into())
        );
        assert_eq!(
            rx.recv_timeout(WAIT).expect("command event"),
            ChannelEvent::Command(Command::new(CommandId::TRIGGER, ["3", "1"]))
        );
        assert_eq!(
            rx.recv_timeout(WAIT).expect("error event"),
            ChannelEvent::Error {
                source: ErrorSource::Device,
                message: "Invalid module type".into(),
            }
        );
    }

    #[test]
    fn bad_frame_is_reported_and_channel_stays_usable() {
        let (_stream, mut device, channel) = open_pair();
        let (_sub, rx) = collect(&channel);

        device.write_all(b"hello;10,ok;\n").expect("device write");

        match rx.recv_timeout(WAIT).expect("error event") {
            ChannelEvent::Error { source, message } => {
                assert_eq!(source, ErrorSource::Decode);
                assert!(message.contains("hello"), "{message}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(
            rx.recv_timeout(WAIT).expect("ack event"),
            ChannelEvent::Command(Command::new(CommandId::ACK, ["ok"]))
        );

        channel
            .send::<&str>(CommandId::STATUS, &[])
            .expect("channel should still send");
        assert!(channel.is_connected());
    }

    #[test]
    fn frames_split_across_chunks() {
        let (_stream, mut device, channel) = open_pair();
        let (_sub, rx) = collect(&channel);

        for chunk in [&b"1,Boa"[..], b"rdX,1.", b"2.3,40", b";\r\n"] {
            device.write_all(chunk).expect("device write");
        }

        assert_eq!(
            rx.recv_timeout(WAIT).expect("info event"),
            ChannelEvent::Command(Command::new(CommandId::INFO, ["BoardX", "1.2.3", "40"]))
        );
    }

    #[test]
    fn empty_debug_and_error_frames_are_silent() {
        let (_stream, mut device, channel) = open_pair();
        let (_sub, rx) = collect(&channel);

        device.write_all(b"12;11;10;").expect("device write");

        assert_eq!(
            rx.recv_timeout(WAIT).expect("ack event"),
            ChannelEvent::Command(Command::bare(CommandId::ACK))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_writes_wire_form_and_echoes_debug() {
        let (stream, _device, channel) = open_pair();
        let (_sub, rx) = collect(&channel);

        channel
            .send(CommandId::SET_PIN, &["3", "ENCODER", "5", "6"])
            .expect("send should succeed");

        assert_eq!(stream.bytes_written(), b"5,3,ENCODER,5,6;\n".len());
        assert_eq!(
            rx.recv_timeout(WAIT).expect("tx debug"),
            ChannelEvent::Debug("TX: 5,3,ENCODER,5,6;".into())
        );
    }

    #[test]
    fn send_while_not_open_writes_nothing() {
        let (stream, _device) = MemoryStream::pair("mem1");
        let stream = Arc::new(stream);
        let channel = CommandChannel::new(stream.clone());

        let err = channel
            .send::<&str>(CommandId::STATUS, &[])
            .expect_err("send on a closed stream must fail");
        assert!(matches!(err, LinkError::NotConnected));
        assert_eq!(stream.bytes_written(), 0);
    }

    #[test]
    fn no_events_after_close() {
        let (stream, mut device, channel) = open_pair();
        let (_sub, rx) = collect(&channel);

        channel.close();
        channel.close();
        device.write_all(b"10,late;").expect("device write");

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(matches!(
            channel.send::<&str>(CommandId::STATUS, &[]),
            Err(LinkError::NotConnected)
        ));
        assert!(stream.is_open(), "closing the channel leaves the transport alone");
    }

    #[test]
    fn close_waits_for_racing_send_echo() {
        let (_stream, _device, channel) = open_pair();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = mpsc::channel();
        let started_tx = Mutex::new(started_tx);
        let handler_order = Arc::clone(&order);
        let _sub = channel.subscribe(move |event| {
            if let ChannelEvent::Debug(text) = event {
                if text.starts_with("TX:") {
                    let _ = lock(&started_tx).send(());
                    thread::sleep(Duration::from_millis(100));
                    lock(&handler_order).push("echo delivered");
                }
            }
        });

        let sender = channel.clone();
        let handle = thread::spawn(move || sender.send::<&str>(CommandId::STATUS, &[]));
        started_rx.recv_timeout(WAIT).expect("echo should start");
        channel.close();
        lock(&order).push("closed");

        handle.join().expect("sender thread").expect("send should succeed");
        assert_eq!(*lock(&order), vec!["echo delivered", "closed"]);
    }

    #[test]
    fn close_from_echo_handler_does_not_hang() {
        let (_stream, _device, channel) = open_pair();
        let (_sub, rx) = collect(&channel);
        let inner = channel.clone();
        let _closer = channel.subscribe(move |event| {
            if matches!(event, ChannelEvent::Debug(_)) {
                inner.close();
            }
        });

        channel
            .send::<&str>(CommandId::STATUS, &[])
            .expect("send should succeed");

        assert!(channel.is_closed());
        assert_eq!(
            rx.recv_timeout(WAIT).expect("echo before close"),
            ChannelEvent::Debug("TX: 0;".into())
        );
    }

    #[test]
    fn transport_write_failure_surfaces() {
        let (stream, _device, channel) = open_pair();
        stream.fail_writes_after(0);

        let err = channel
            .send::<&str>(CommandId::SAVE_CONFIG, &[])
            .expect_err("write should fail");
        assert!(matches!(err, LinkError::Transport(_)));
    }
}

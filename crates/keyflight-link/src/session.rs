use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use keyflight_frame::{Command, CommandId, FrameConfig};
use keyflight_transport::{ByteStream, PortSettings, SerialFactory, StreamFactory};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, CommandChannel, ErrorSource};
use crate::error::{LinkError, Result};
use crate::events::{lock, Dispatcher, Subscription};
use crate::handshake::{self, DeviceIdentity, Outcome, Signal, DEFAULT_MAX_MODULES};
use crate::modules::InputModule;
use crate::upload::{upload_configuration, CommandSink, UploadConfig, UploadSummary};

/// Connection settings for a [`LinkSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Serial port settings.
    pub port: PortSettings,
    /// Frame reassembly settings.
    pub frame: FrameConfig,
    /// Pause after opening the port while the device reboots.
    pub settle_delay: Duration,
    /// Deadline for the info reply after the status query.
    pub handshake_timeout: Duration,
    /// Module count assumed when the device does not report one.
    pub default_max_modules: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: PortSettings::default(),
            frame: FrameConfig::default(),
            settle_delay: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(5),
            default_max_modules: DEFAULT_MAX_MODULES,
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Notification delivered to session subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake completed.
    Connected(DeviceIdentity),
    /// The session is (again) disconnected.
    Disconnected,
    /// Human-readable log line.
    Log(String),
    /// Any command other than debug/error, forwarded while connected.
    CommandReceived(Command),
    /// The device reported an input trigger.
    InputTriggered { module_id: u32, value: Option<i32> },
}

/// One device connection.
///
/// Open/handshake/close are serialized by the caller: at most one `connect`
/// may be in flight. `disconnect` is safe at any time, from any thread.
pub struct LinkSession {
    config: SessionConfig,
    factory: Arc<dyn StreamFactory>,
    shared: Arc<SessionShared>,
}

struct SessionShared {
    core: Mutex<Core>,
    connected: AtomicBool,
    events: Dispatcher<SessionEvent>,
    /// Thread currently announcing a Connected/Disconnected transition.
    announcing: Mutex<Option<ThreadId>>,
    announced: Condvar,
}

/// Held while a lifecycle transition is committed and announced.
struct Announcement<'a> {
    shared: &'a SessionShared,
}

impl Drop for Announcement<'_> {
    fn drop(&mut self) {
        *lock(&self.shared.announcing) = None;
        self.shared.announced.notify_all();
    }
}

#[derive(Default)]
struct Core {
    state: SessionState,
    generation: u64,
    stream: Option<Arc<dyn ByteStream>>,
    channel: Option<CommandChannel>,
    router: Option<Subscription>,
    identity: Option<DeviceIdentity>,
    pending: Option<Signal>,
}

impl LinkSession {
    /// Session over real serial ports.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_factory(config, Arc::new(SerialFactory))
    }

    /// Session over streams built by `factory`.
    pub fn with_factory(config: SessionConfig, factory: Arc<dyn StreamFactory>) -> Self {
        Self {
            config,
            factory,
            shared: Arc::new(SessionShared {
                core: Mutex::new(Core::default()),
                connected: AtomicBool::new(false),
                events: Dispatcher::new(),
                announcing: Mutex::new(None),
                announced: Condvar::new(),
            }),
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register a handler for session events.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(handler)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Whether the handshake has completed and the link is up.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Device identity learned during the handshake, while connected.
    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.shared.lock().identity.clone()
    }

    /// Open `port`, let the device boot and run the handshake.
    ///
    /// On any failure the transport is torn down and the session ends up
    /// [`SessionState::Disconnected`]; the caller may retry.
    pub fn connect(&self, port: &str) -> Result<DeviceIdentity> {
        let (signal, outcome) = handshake::signal();
        let generation = {
            let mut core = self.shared.lock();
            if core.state != SessionState::Disconnected {
                return Err(LinkError::Busy);
            }
            core.state = SessionState::Connecting;
            core.generation += 1;
            core.pending = Some(signal.clone());
            core.generation
        };

        self.shared.log(format!(
            "connecting to {port} at {} baud...",
            self.config.port.baud_rate
        ));

        match self.establish(port, generation, &signal, &outcome) {
            Ok(identity) => Ok(identity),
            Err(err) => {
                if self.shared.lock().generation != generation {
                    // disconnect() already tore everything down.
                    return Err(match err {
                        LinkError::Cancelled(_) => err,
                        _ => LinkError::Cancelled("session closed during connect".to_string()),
                    });
                }
                match &err {
                    LinkError::Timeout(_) => self.shared.log("failed to receive device info"),
                    other => self.shared.log(format!("connection failed: {other}")),
                }
                warn!(port, error = %err, "connect failed");
                self.shared.teardown(Some(generation));
                Err(err)
            }
        }
    }

    fn establish(
        &self,
        port: &str,
        generation: u64,
        signal: &Signal,
        outcome: &Receiver<Outcome>,
    ) -> Result<DeviceIdentity> {
        let stream = self.factory.create(port, &self.config.port);
        stream.open()?;

        let channel = CommandChannel::with_config(Arc::clone(&stream), self.config.frame.clone());
        let router = SessionShared::route(&self.shared, &channel);
        {
            let mut core = self.shared.lock();
            if core.generation != generation {
                drop(core);
                drop(router);
                channel.close();
                let _ = stream.close();
                return Err(LinkError::Cancelled(
                    "session closed while opening the port".to_string(),
                ));
            }
            core.stream = Some(Arc::clone(&stream));
            core.channel = Some(channel.clone());
            core.router = Some(router);
        }

        debug!(port, settle = ?self.config.settle_delay, "waiting for device boot");
        handshake::settle(outcome, self.config.settle_delay)?;

        let identity = handshake::perform(
            &channel,
            signal,
            outcome,
            self.config.handshake_timeout,
            self.config.default_max_modules,
        )?;

        // A racing teardown announces Disconnected only after this returns.
        let _announcement = self.shared.announce();
        {
            let mut core = self.shared.lock();
            if core.generation != generation {
                return Err(LinkError::Cancelled(
                    "session closed during handshake".to_string(),
                ));
            }
            core.state = SessionState::Connected;
            core.identity = Some(identity.clone());
            core.pending = None;
            self.shared.connected.store(true, Ordering::SeqCst);
        }

        info!(
            port,
            board = %identity.board_type,
            firmware = %identity.firmware_version,
            max_modules = identity.max_modules,
            "connected"
        );
        self.shared.log(format!(
            "connected to {} v{} (max modules: {})",
            identity.board_type, identity.firmware_version, identity.max_modules
        ));
        self.shared
            .events
            .emit(&SessionEvent::Connected(identity.clone()));
        Ok(identity)
    }

    /// Close the link. Idempotent; always ends Disconnected and always
    /// emits [`SessionEvent::Disconnected`].
    ///
    /// Cancels an in-flight `connect`.
    pub fn disconnect(&self) {
        self.shared.teardown(None);
    }

    /// Send a raw command. Requires [`SessionState::Connected`].
    pub fn send<S: AsRef<str>>(&self, id: CommandId, args: &[S]) -> Result<()> {
        let command = Command::new(id, args.iter().map(|arg| arg.as_ref().to_string()));
        self.send_command(&command)
    }

    /// Send a prepared command. Requires [`SessionState::Connected`].
    pub fn send_command(&self, command: &Command) -> Result<()> {
        let channel = {
            let core = self.shared.lock();
            if core.state != SessionState::Connected {
                return Err(LinkError::NotConnected);
            }
            core.channel.clone().ok_or(LinkError::NotConnected)?
        };
        channel.send_command(command)
    }

    /// Upload `modules` and persist them, reporting progress as log events.
    pub fn upload(&self, modules: &[InputModule], config: &UploadConfig) -> Result<UploadSummary> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.shared.log("uploading configuration...");
        match upload_configuration(self, modules, config) {
            Ok(summary) => {
                self.shared.log(format!(
                    "configuration uploaded ({} modules, {} commands)",
                    summary.modules, summary.commands
                ));
                Ok(summary)
            }
            Err(err) => {
                self.shared.log(format!("upload failed: {err}"));
                Err(err)
            }
        }
    }
}

impl CommandSink for LinkSession {
    fn is_ready(&self) -> bool {
        self.is_connected()
    }

    fn send_command(&self, command: &Command) -> Result<()> {
        LinkSession::send_command(self, command)
    }
}

impl fmt::Debug for LinkSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.lock();
        f.debug_struct("LinkSession")
            .field("state", &core.state)
            .field("identity", &core.identity)
            .field("config", &self.config)
            .finish()
    }
}

impl Drop for LinkSession {
    fn drop(&mut self) {
        if self.state() != SessionState::Disconnected {
            self.disconnect();
        }
    }
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        lock(&self.core)
    }

    fn log(&self, line: impl Into<String>) {
        self.events.emit(&SessionEvent::Log(line.into()));
    }

    /// Wait until no other thread is announcing a transition, then claim it.
    ///
    /// Returns `None` when the calling thread already holds it (a handler
    /// disconnecting from inside its Connected notification).
    fn announce(&self) -> Option<Announcement<'_>> {
        let me = thread::current().id();
        let mut owner = lock(&self.announcing);
        if *owner == Some(me) {
            return None;
        }
        while owner.is_some() {
            owner = self
                .announced
                .wait(owner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *owner = Some(me);
        Some(Announcement { shared: self })
    }

    /// Subscribe the session's router to `channel`.
    fn route(this: &Arc<Self>, channel: &CommandChannel) -> Subscription {
        let weak: Weak<Self> = Arc::downgrade(this);
        channel.subscribe(move |event| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match event {
                ChannelEvent::Debug(text) => shared.log(text.clone()),
                ChannelEvent::Error { source, message } => {
                    shared.log(format!("ERROR: {message}"));
                    if *source == ErrorSource::Transport && shared.connected.load(Ordering::SeqCst) {
                        warn!(%message, "transport failed; disconnecting");
                        shared.teardown(None);
                    }
                }
                ChannelEvent::Command(command) => {
                    if !shared.connected.load(Ordering::SeqCst) {
                        return;
                    }
                    shared
                        .events
                        .emit(&SessionEvent::CommandReceived(command.clone()));
                    if command.id == CommandId::TRIGGER {
                        if let Some(module_id) =
                            command.arg(0).and_then(|id| id.trim().parse().ok())
                        {
                            let value = command.arg(1).and_then(|v| v.trim().parse().ok());
                            shared
                                .events
                                .emit(&SessionEvent::InputTriggered { module_id, value });
                        }
                    }
                }
            }
        })
    }

    /// Tear the link down. With `only_generation`, does nothing when a newer
    /// attempt or a disconnect has happened since.
    fn teardown(&self, only_generation: Option<u64>) {
        let (stream, channel, router, pending) = {
            let mut core = self.lock();
            if only_generation.is_some_and(|generation| generation != core.generation) {
                return;
            }
            core.generation += 1;
            core.state = SessionState::Disconnected;
            core.identity = None;
            self.connected.store(false, Ordering::SeqCst);
            (
                core.stream.take(),
                core.channel.take(),
                core.router.take(),
                core.pending.take(),
            )
        };

        if let Some(signal) = pending {
            signal.fire(Outcome::Cancelled);
        }
        drop(router);
        if let Some(channel) = channel {
            channel.close();
        }
        if let Some(stream) = stream {
            if let Err(err) = stream.close() {
                warn!(port = stream.name(), error = %err, "error closing transport");
            }
            info!(port = stream.name(), "disconnected");
        }

        let _announcement = self.announce();
        self.log("disconnected");
        self.events.emit(&SessionEvent::Disconnected);
    }
}

//! Simulated firmware for session and upload tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use keyflight_frame::{Command, CommandId, CommandReader, CommandWriter, FrameError};
use keyflight_transport::{ByteStream, MemoryDevice, MemoryStream, PortSettings, StreamFactory};

use crate::events::{lock, Subscription};
use crate::session::{LinkSession, SessionConfig, SessionEvent};

pub(crate) fn quick_config() -> SessionConfig {
    SessionConfig {
        settle_delay: Duration::from_millis(10),
        handshake_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    }
}

pub(crate) fn collect_events(session: &LinkSession) -> (Subscription, mpsc::Receiver<SessionEvent>) {
    let (tx, rx) = mpsc::channel();
    let sub = session.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });
    (sub, rx)
}

struct Identity {
    board: String,
    version: String,
    max_modules: String,
}

/// A device thread answering like the KeyFlight firmware.
pub(crate) struct SimulatedDevice {
    stream: Arc<MemoryStream>,
    device: MemoryDevice,
    received: Arc<Mutex<Vec<Command>>>,
    muted: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl SimulatedDevice {
    /// Device that answers status queries with the given identity.
    pub(crate) fn spawn(board: &str, version: &str, max_modules: &str) -> Self {
        Self::start(Some(Identity {
            board: board.to_string(),
            version: version.to_string(),
            max_modules: max_modules.to_string(),
        }))
    }

    /// Device that reads but never answers.
    pub(crate) fn silent() -> Self {
        Self::start(None)
    }

    fn start(identity: Option<Identity>) -> Self {
        let (stream, device) = MemoryStream::pair("sim0");
        let sim = Self {
            stream: Arc::new(stream),
            device,
            received: Arc::new(Mutex::new(Vec::new())),
            muted: Arc::new(AtomicBool::new(identity.is_none())),
            stop: Arc::new(AtomicBool::new(false)),
        };

        let device = sim.device.clone();
        let received = Arc::clone(&sim.received);
        let muted = Arc::clone(&sim.muted);
        let stop = Arc::clone(&sim.stop);
        thread::spawn(move || {
            let mut reader = CommandReader::new(device.clone());
            let mut writer = CommandWriter::new(device.clone());
            let mut modules: BTreeMap<u32, Vec<String>> = BTreeMap::new();
            while !stop.load(Ordering::SeqCst) {
                match reader.read_command() {
                    Ok(command) => {
                        lock(&received).push(command.clone());
                        if !muted.load(Ordering::SeqCst) {
                            if let Some(identity) = &identity {
                                respond(&command, identity, &mut modules, &mut writer);
                            }
                        }
                    }
                    Err(FrameError::ConnectionClosed) => {
                        // Host closed the port; wait for it to reopen.
                        while !device.is_host_open() && !stop.load(Ordering::SeqCst) {
                            thread::sleep(Duration::from_millis(2));
                        }
                    }
                    Err(_) => {}
                }
            }
        });

        sim
    }

    /// Factory handing out this device's host stream.
    pub(crate) fn factory(&self) -> Arc<dyn StreamFactory> {
        let stream = Arc::clone(&self.stream);
        Arc::new(move |_: &str, _: &PortSettings| -> Arc<dyn ByteStream> { stream.clone() })
    }

    pub(crate) fn stream(&self) -> &Arc<MemoryStream> {
        &self.stream
    }

    /// Stop answering; commands are still recorded.
    pub(crate) fn mute(&self) {
        self.muted.store(true, Ordering::SeqCst);
    }

    /// Commands received so far.
    pub(crate) fn received(&self) -> Vec<Command> {
        lock(&self.received).clone()
    }

    /// Wait until at least `count` commands arrived, then return them all.
    pub(crate) fn wait_for(&self, count: usize) -> Vec<Command> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while lock(&self.received).len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        self.received()
    }

    /// Send an unsolicited command to the host from the calling thread.
    pub(crate) fn emit(&self, command: &Command) {
        let mut writer = CommandWriter::new(self.device.clone());
        let _ = writer.write_command(command);
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.stream.close();
    }
}

fn respond(
    command: &Command,
    identity: &Identity,
    modules: &mut BTreeMap<u32, Vec<String>>,
    writer: &mut CommandWriter<MemoryDevice>,
) {
    let ack = |text: &str| Command::new(CommandId::ACK, [text]);
    let replies = match command.id {
        CommandId::STATUS => vec![Command::new(
            CommandId::INFO,
            [
                identity.board.as_str(),
                identity.version.as_str(),
                identity.max_modules.as_str(),
            ],
        )],
        CommandId::SET_PIN => match command.arg(0).and_then(|id| id.parse().ok()) {
            Some(id) if command.args.len() >= 4 => {
                modules.insert(id, command.args[1..4].to_vec());
                vec![ack("Module configured")]
            }
            _ => vec![Command::new(CommandId::ERROR, ["Invalid kSetPin arguments"])],
        },
        CommandId::SET_KEY => vec![ack("Key command set")],
        CommandId::RESET_CONFIG => {
            modules.clear();
            vec![ack("Configuration reset")]
        }
        CommandId::SAVE_CONFIG => vec![ack("Configuration saved")],
        CommandId::GET_CONFIG => {
            let mut replies: Vec<Command> = modules
                .iter()
                .map(|(id, fields)| {
                    let mut args = vec![id.to_string()];
                    args.extend(fields.iter().cloned());
                    Command::new(CommandId::CONFIG_INFO, args)
                })
                .collect();
            replies.push(ack("Configuration sent"));
            replies
        }
        _ => Vec::new(),
    };

    for reply in replies {
        if writer.write_command(&reply).is_err() {
            return;
        }
    }
}

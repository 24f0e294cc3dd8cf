use std::str::FromStr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use keyflight_frame::{Command, CommandId};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{LinkError, Result};
use crate::modules::InputKind;
use crate::session::{LinkSession, SessionEvent};

/// Text of the acknowledgment that ends a configuration dump.
pub const CONFIG_SENT_ACK: &str = "Configuration sent";

/// One module as stored on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub id: u32,
    /// Type name as sent by the firmware (`BUTTON`, `ENCODER`, ...).
    pub kind: String,
    pub pin: u8,
    pub pin2: u8,
}

impl ModuleSummary {
    /// Parse a `4,<id>,<TYPE>,<pin>,<pin2>` frame.
    pub fn from_command(command: &Command) -> Option<Self> {
        if command.id != CommandId::CONFIG_INFO {
            return None;
        }
        Some(Self {
            id: number(command, 0)?,
            kind: command.arg(1)?.trim().to_string(),
            pin: number(command, 2)?,
            pin2: number(command, 3).unwrap_or(0),
        })
    }

    /// The kind, if the firmware reported a known one.
    pub fn input_kind(&self) -> Option<InputKind> {
        self.kind.parse().ok()
    }
}

fn number<T: FromStr>(command: &Command, index: usize) -> Option<T> {
    command.arg(index).and_then(|v| v.trim().parse().ok())
}

enum Reply {
    Command(Command),
    Closed,
}

/// Ask the device for its stored configuration.
///
/// Collects config-info frames until the closing acknowledgment, bounded by
/// `timeout`. Requires a connected session.
pub fn read_configuration(session: &LinkSession, timeout: Duration) -> Result<Vec<ModuleSummary>> {
    if !session.is_connected() {
        return Err(LinkError::NotConnected);
    }

    let (tx, rx) = mpsc::channel();
    let _subscription = session.subscribe(move |event| {
        let reply = match event {
            SessionEvent::CommandReceived(command)
                if command.id == CommandId::CONFIG_INFO || command.id == CommandId::ACK =>
            {
                Reply::Command(command.clone())
            }
            SessionEvent::Disconnected => Reply::Closed,
            _ => return,
        };
        let _ = tx.send(reply);
    });

    session.send_command(&Command::bare(CommandId::GET_CONFIG))?;

    let deadline = Instant::now() + timeout;
    let mut modules = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Reply::Command(command)) if command.id == CommandId::CONFIG_INFO => {
                match ModuleSummary::from_command(&command) {
                    Some(module) => modules.push(module),
                    None => warn!(frame = %command, "ignoring malformed config info"),
                }
            }
            Ok(Reply::Command(ack)) => {
                if ack.text() == CONFIG_SENT_ACK {
                    debug!(modules = modules.len(), "configuration read back");
                    return Ok(modules);
                }
            }
            Ok(Reply::Closed) | Err(RecvTimeoutError::Disconnected) => {
                return Err(LinkError::Cancelled(
                    "session closed during configuration read-back".to_string(),
                ));
            }
            Err(RecvTimeoutError::Timeout) => return Err(LinkError::Timeout(timeout)),
        }
    }
}

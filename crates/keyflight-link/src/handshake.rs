use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use keyflight_frame::{Command, CommandId};
use serde::Serialize;
use tracing::debug;

use crate::channel::{ChannelEvent, CommandChannel, ErrorSource};
use crate::error::{LinkError, Result};

/// Module count assumed when the info reply carries none.
pub const DEFAULT_MAX_MODULES: u32 = 40;

/// What the device reported during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub board_type: String,
    pub firmware_version: String,
    pub max_modules: u32,
}

impl DeviceIdentity {
    /// Build from an info reply (`1,<board>,<version>,<max>`).
    ///
    /// Missing text fields become empty; a missing or unparseable count
    /// falls back to `default_max_modules`.
    pub fn from_reply(reply: &Command, default_max_modules: u32) -> Self {
        Self {
            board_type: reply.arg(0).unwrap_or_default().to_string(),
            firmware_version: reply.arg(1).unwrap_or_default().to_string(),
            max_modules: reply
                .arg(2)
                .and_then(|count| count.trim().parse().ok())
                .unwrap_or(default_max_modules),
        }
    }
}

/// Outcome delivered through the single-shot signal.
#[derive(Debug)]
pub(crate) enum Outcome {
    Reply(Command),
    Failed(String),
    Cancelled,
}

/// Sending half of a single-shot completion signal.
///
/// Only the first [`Signal::fire`] is delivered; later ones are ignored.
#[derive(Debug, Clone)]
pub(crate) struct Signal(SyncSender<Outcome>);

impl Signal {
    pub(crate) fn fire(&self, outcome: Outcome) -> bool {
        self.0.try_send(outcome).is_ok()
    }
}

pub(crate) fn signal() -> (Signal, Receiver<Outcome>) {
    let (tx, rx) = mpsc::sync_channel(1);
    (Signal(tx), rx)
}

/// Wait out the device's boot sequence, returning early on cancellation.
pub(crate) fn settle(outcome: &Receiver<Outcome>, delay: Duration) -> Result<()> {
    match outcome.recv_timeout(delay) {
        Err(RecvTimeoutError::Timeout) => Ok(()),
        Ok(Outcome::Failed(message)) => Err(LinkError::HandshakeFailed(message)),
        Ok(Outcome::Reply(_)) => Ok(()),
        Ok(Outcome::Cancelled) | Err(RecvTimeoutError::Disconnected) => Err(
            LinkError::Cancelled("session closed while the device was booting".to_string()),
        ),
    }
}

/// Ask the device who it is and wait for the answer.
///
/// Sends exactly one status query. The first info reply before `timeout`
/// wins; the temporary subscription is released on every path.
pub(crate) fn perform(
    channel: &CommandChannel,
    signal: &Signal,
    outcome: &Receiver<Outcome>,
    timeout: Duration,
    default_max_modules: u32,
) -> Result<DeviceIdentity> {
    let waiter = signal.clone();
    let _subscription = channel.subscribe(move |event| match event {
        ChannelEvent::Command(reply) if reply.id == CommandId::INFO => {
            waiter.fire(Outcome::Reply(reply.clone()));
        }
        ChannelEvent::Error {
            source: ErrorSource::Transport,
            message,
        } => {
            waiter.fire(Outcome::Failed(message.clone()));
        }
        _ => {}
    });

    debug!(port = channel.stream().name(), ?timeout, "sending status query");
    channel.send_command(&Command::bare(CommandId::STATUS))?;

    match outcome.recv_timeout(timeout) {
        Ok(Outcome::Reply(reply)) => Ok(DeviceIdentity::from_reply(&reply, default_max_modules)),
        Ok(Outcome::Failed(message)) => Err(LinkError::HandshakeFailed(message)),
        Ok(Outcome::Cancelled) | Err(RecvTimeoutError::Disconnected) => Err(
            LinkError::Cancelled("session closed during handshake".to_string()),
        ),
        Err(RecvTimeoutError::Timeout) => Err(LinkError::Timeout(timeout)),
    }
}

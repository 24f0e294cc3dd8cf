//! Configuration upload sequencing.
//!
//! The firmware has no request queue and addresses module state by id across
//! separate commands, so ordering and pacing both matter:
//!
//! ```text
//! RESET_CONFIG
//! (reset settle)
//! for each enabled module:
//!     SET_PIN id,TYPE,pin,pin2
//!     (gap)
//!     SET_KEY id,key
//!     [(gap) SET_KEY id,key2]      encoder/switch with a second key
//!     (gap)
//! SAVE_CONFIG
//! ```

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use keyflight_frame::{Command, CommandId};
use serde::Serialize;
use tracing::{debug, info};

use crate::channel::CommandChannel;
use crate::error::{LinkError, Result};
use crate::modules::InputModule;

/// Pacing between upload commands.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Pause after the reset command.
    pub reset_settle: Duration,
    /// Pause between consecutive module commands.
    pub command_gap: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            reset_settle: Duration::from_millis(100),
            command_gap: Duration::from_millis(50),
        }
    }
}

/// One step of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStep {
    Send(Command),
    Settle(Duration),
}

/// Counts reported after a successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub modules: usize,
    pub commands: usize,
}

/// Anything commands can be sent through.
pub trait CommandSink {
    /// Whether sending is currently allowed.
    fn is_ready(&self) -> bool;

    /// Send one command.
    fn send_command(&self, command: &Command) -> Result<()>;
}

impl CommandSink for CommandChannel {
    fn is_ready(&self) -> bool {
        self.is_connected()
    }

    fn send_command(&self, command: &Command) -> Result<()> {
        CommandChannel::send_command(self, command)
    }
}

/// Build the ordered upload plan for the enabled modules.
pub fn plan_upload(modules: &[InputModule], config: &UploadConfig) -> Vec<UploadStep> {
    let gap = config.command_gap;
    let mut steps = vec![
        UploadStep::Send(Command::bare(CommandId::RESET_CONFIG)),
        UploadStep::Settle(config.reset_settle),
    ];

    for module in modules.iter().filter(|m| m.enabled) {
        let id = module.id.to_string();
        steps.push(UploadStep::Send(Command::new(
            CommandId::SET_PIN,
            [
                id.clone(),
                module.kind.wire_name().to_string(),
                module.pin.to_string(),
                module.pin2.to_string(),
            ],
        )));
        steps.push(UploadStep::Settle(gap));
        steps.push(UploadStep::Send(Command::new(
            CommandId::SET_KEY,
            [id.clone(), module.key_command.clone()],
        )));
        if module.kind.uses_key2() && !module.key_command2.trim().is_empty() {
            steps.push(UploadStep::Settle(gap));
            steps.push(UploadStep::Send(Command::new(
                CommandId::SET_KEY,
                [id, module.key_command2.clone()],
            )));
        }
        steps.push(UploadStep::Settle(gap));
    }

    steps.push(UploadStep::Send(Command::bare(CommandId::SAVE_CONFIG)));
    steps
}

/// Check the enabled modules against what the firmware accepts.
///
/// [`upload_configuration`] does not call this; callers that build
/// snapshots from user input run it first.
pub fn validate_upload(modules: &[InputModule]) -> Result<()> {
    let mut ids = HashSet::new();
    for module in modules.iter().filter(|m| m.enabled) {
        module
            .validate()
            .map_err(|err| match err {
                LinkError::InvalidModule(msg) => {
                    LinkError::InvalidModule(format!("module {}: {msg}", module.id))
                }
                other => other,
            })?;
        if !ids.insert(module.id) {
            return Err(LinkError::InvalidModule(format!(
                "module id {} appears more than once",
                module.id
            )));
        }
    }
    Ok(())
}

/// Upload `modules` through `sink` and persist them on the device.
///
/// Fails with [`LinkError::NotConnected`] without sending when the sink is
/// not ready. Modules are sent as given, without validation; run
/// [`validate_upload`] first when that matters. A send failure aborts the
/// remaining steps and whatever the device already applied stays applied.
pub fn upload_configuration<S>(
    sink: &S,
    modules: &[InputModule],
    config: &UploadConfig,
) -> Result<UploadSummary>
where
    S: CommandSink + ?Sized,
{
    if !sink.is_ready() {
        return Err(LinkError::NotConnected);
    }

    let steps = plan_upload(modules, config);
    let summary = UploadSummary {
        modules: modules.iter().filter(|m| m.enabled).count(),
        commands: steps
            .iter()
            .filter(|step| matches!(step, UploadStep::Send(_)))
            .count(),
    };
    debug!(
        modules = summary.modules,
        commands = summary.commands,
        "starting configuration upload"
    );

    for step in &steps {
        match step {
            UploadStep::Send(command) => sink.send_command(command)?,
            UploadStep::Settle(delay) => {
                if !delay.is_zero() {
                    thread::sleep(*delay);
                }
            }
        }
    }

    info!(
        modules = summary.modules,
        commands = summary.commands,
        "configuration uploaded"
    );
    Ok(summary)
}

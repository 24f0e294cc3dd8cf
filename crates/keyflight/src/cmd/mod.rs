use std::time::Duration;

use clap::{Args, Subcommand};
use keyflight_link::{DeviceIdentity, LinkSession, SessionConfig, SessionEvent, Subscription};
use keyflight_transport::{PortSettings, DEFAULT_BAUD_RATE};

use crate::exit::{link_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod dump;
pub mod info;
pub mod monitor;
pub mod ports;
pub mod send;
pub mod upload;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available serial ports.
    Ports(PortsArgs),
    /// Connect and print the device identity.
    Info(InfoArgs),
    /// Upload a module configuration and save it on the device.
    Upload(UploadArgs),
    /// Read back the configuration stored on the device.
    Dump(DumpArgs),
    /// Print triggers and commands received from the device.
    Monitor(MonitorArgs),
    /// Send one raw command and print replies.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Ports(args) => ports::run(args, format),
        Command::Info(args) => info::run(args, format),
        Command::Upload(args) => upload::run(args, format),
        Command::Dump(args) => dump::run(args, format),
        Command::Monitor(args) => monitor::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Flags shared by every subcommand that opens a device.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Baud rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE, env = "KEYFLIGHT_BAUD")]
    pub baud: u32,
    /// Wait after opening the port while the board reboots (e.g. 2s, 0).
    #[arg(long, default_value = "2s")]
    pub settle: String,
    /// Maximum wait for the device identity (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: String,
}

impl ConnectionArgs {
    pub fn session_config(&self) -> CliResult<SessionConfig> {
        Ok(SessionConfig {
            port: PortSettings {
                baud_rate: self.baud,
                ..PortSettings::default()
            },
            settle_delay: parse_duration(&self.settle)?,
            handshake_timeout: parse_timeout(&self.handshake_timeout)?,
            ..SessionConfig::default()
        })
    }
}

/// Open `port`, run the handshake and forward session log lines to tracing.
pub fn connect(
    port: &str,
    args: &ConnectionArgs,
) -> CliResult<(LinkSession, DeviceIdentity, Subscription)> {
    let session = LinkSession::new(args.session_config()?);
    let logs = session.subscribe(|event| {
        if let SessionEvent::Log(line) = event {
            tracing::info!("{line}");
        }
    });
    let identity = session
        .connect(port)
        .map_err(|err| link_error("connect failed", err))?;
    Ok((session, identity, logs))
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Serial port (e.g. /dev/ttyACM0, COM3).
    pub port: String,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Serial port (e.g. /dev/ttyACM0, COM3).
    pub port: String,
    /// Module as id:kind:pin[:pin2]:key[:key2]. Encoders take pin2.
    #[arg(long = "module", value_name = "SPEC", required = true)]
    pub modules: Vec<String>,
    /// Pause after the reset command.
    #[arg(long, default_value = "100ms")]
    pub reset_settle: String,
    /// Pause between module commands.
    #[arg(long, default_value = "50ms")]
    pub command_gap: String,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Serial port (e.g. /dev/ttyACM0, COM3).
    pub port: String,
    /// Maximum wait for the full configuration.
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Serial port (e.g. /dev/ttyACM0, COM3).
    pub port: String,
    /// Exit after printing N events (at least 1).
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub count: Option<u64>,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Serial port (e.g. /dev/ttyACM0, COM3).
    pub port: String,
    /// Command id (0-12 for the known vocabulary).
    pub id: u16,
    /// Command arguments, sent verbatim.
    pub args: Vec<String>,
    /// How long to print replies after sending (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s")]
    pub wait: String,
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `2s` or a bare number of seconds. Zero is allowed.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Like [`parse_duration`], but zero is rejected.
pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let timeout = parse_duration(input)?;
    if timeout.is_zero() {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }
    Ok(timeout)
}

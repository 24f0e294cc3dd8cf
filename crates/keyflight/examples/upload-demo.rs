//! Upload a configuration to an in-memory KeyFlight device and read it back.
//!
//! Run: `cargo run -p keyflight --example upload-demo`

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use keyflight::frame::{Command, CommandId, CommandReader, CommandWriter};
use keyflight::link::{
    read_configuration, InputKind, InputModule, LinkSession, SessionConfig, SessionEvent,
    UploadConfig,
};
use keyflight::transport::{ByteStream, MemoryDevice, MemoryStream, PortSettings};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host, device) = MemoryStream::pair("demo0");
    thread::spawn(move || firmware(device));

    let host: Arc<dyn ByteStream> = Arc::new(host);
    let factory = Arc::new(move |_: &str, _: &PortSettings| -> Arc<dyn ByteStream> {
        host.clone()
    });
    let config = SessionConfig {
        settle_delay: Duration::from_millis(50),
        ..SessionConfig::default()
    };
    let session = LinkSession::with_factory(config, factory);
    let _logs = session.subscribe(|event| {
        if let SessionEvent::Log(line) = event {
            println!("[log] {line}");
        }
    });

    let identity = session.connect("demo0")?;
    println!("device: {identity:?}");

    let modules = vec![
        InputModule::new(1, InputKind::Button, 2, "CTRL+F"),
        InputModule::new(2, InputKind::Encoder, 3, "VOL_UP")
            .with_pin2(4)
            .with_key2("VOL_DOWN"),
    ];
    let summary = session.upload(&modules, &UploadConfig::default())?;
    println!("uploaded: {summary:?}");

    for module in read_configuration(&session, Duration::from_secs(1))? {
        println!("stored: {module:?}");
    }

    session.disconnect();
    Ok(())
}

/// Minimal firmware: identity, acknowledgments and a config dump.
fn firmware(device: MemoryDevice) {
    let mut reader = CommandReader::new(device.clone());
    let mut writer = CommandWriter::new(device);
    let mut stored: Vec<Command> = Vec::new();

    while let Ok(command) = reader.read_command() {
        let ack = |text: &str| Command::new(CommandId::ACK, [text]);
        let replies = match command.id {
            CommandId::STATUS => vec![Command::new(CommandId::INFO, ["MEGA", "1.0.0", "40"])],
            CommandId::RESET_CONFIG => {
                stored.clear();
                vec![ack("Configuration reset")]
            }
            CommandId::SET_PIN => {
                stored.push(Command::new(CommandId::CONFIG_INFO, command.args.clone()));
                vec![ack("Module configured")]
            }
            CommandId::SET_KEY => vec![ack("Key command set")],
            CommandId::SAVE_CONFIG => vec![ack("Configuration saved")],
            CommandId::GET_CONFIG => {
                let mut dump = stored.clone();
                dump.push(ack("Configuration sent"));
                dump
            }
            _ => Vec::new(),
        };
        for reply in &replies {
            if writer.write_command(reply).is_err() {
                return;
            }
        }
    }
}

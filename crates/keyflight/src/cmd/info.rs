use keyflight_link::DeviceIdentity;
use serde::Serialize;

use crate::cmd::{connect, InfoArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct InfoOutput<'a> {
    port: &'a str,
    connected: bool,
    #[serde(flatten)]
    identity: &'a DeviceIdentity,
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let (session, identity, _logs) = connect(&args.port, &args.connection)?;
    print_info(&args.port, session.is_connected(), &identity, format);
    session.disconnect();
    Ok(SUCCESS)
}

fn print_info(port: &str, connected: bool, identity: &DeviceIdentity, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&InfoOutput {
            port,
            connected,
            identity,
        }),
        OutputFormat::Table => print_table(
            &["FIELD", "VALUE"],
            vec![
                vec!["port".into(), port.to_string()],
                vec!["connected".into(), connected.to_string()],
                vec!["board_type".into(), identity.board_type.clone()],
                vec!["firmware_version".into(), identity.firmware_version.clone()],
                vec!["max_modules".into(), identity.max_modules.to_string()],
            ],
        ),
        OutputFormat::Pretty => {
            println!("port: {port}");
            println!("connected: {connected}");
            println!("board_type: {}", identity.board_type);
            println!("firmware_version: {}", identity.firmware_version);
            println!("max_modules: {}", identity.max_modules);
        }
    }
}

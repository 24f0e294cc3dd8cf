use keyflight_transport::{available_ports, PortInfo};
use serde::Serialize;

use crate::cmd::PortsArgs;
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct PortOutput<'a> {
    name: &'a str,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    vid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    product: Option<&'a str>,
}

impl<'a> From<&'a PortInfo> for PortOutput<'a> {
    fn from(port: &'a PortInfo) -> Self {
        Self {
            name: &port.name,
            kind: port.kind,
            vid: port.vid.map(|vid| format!("{vid:04x}")),
            pid: port.pid.map(|pid| format!("{pid:04x}")),
            product: port.product.as_deref(),
        }
    }
}

pub fn run(_args: PortsArgs, format: OutputFormat) -> CliResult<i32> {
    let ports = available_ports().map_err(|err| transport_error("port scan failed", err))?;
    let rows: Vec<PortOutput<'_>> = ports.iter().map(PortOutput::from).collect();

    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Table => print_table(
            &["PORT", "TYPE", "VID:PID", "PRODUCT"],
            rows.iter()
                .map(|port| {
                    vec![
                        port.name.to_string(),
                        port.kind.to_string(),
                        usb_id(port),
                        port.product.unwrap_or("-").to_string(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty => {
            if rows.is_empty() {
                println!("no serial ports found");
            }
            for port in &rows {
                println!("{} ({}) {}", port.name, port.kind, usb_id(port));
            }
        }
    }

    Ok(SUCCESS)
}

fn usb_id(port: &PortOutput<'_>) -> String {
    match (&port.vid, &port.pid) {
        (Some(vid), Some(pid)) => format!("{vid}:{pid}"),
        _ => "-".to_string(),
    }
}

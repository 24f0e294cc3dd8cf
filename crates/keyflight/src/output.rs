use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use keyflight_frame::Command;
use keyflight_link::SessionEvent;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_table(header: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

/// One line of `monitor`/`send` output.
#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct EventOutput {
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl EventOutput {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            id: None,
            name: None,
            args: Vec::new(),
            module_id: None,
            value: None,
            message: None,
            timestamp: now_unix_seconds(),
        }
    }

    pub fn command(command: &Command) -> Self {
        Self {
            id: Some(command.id.value()),
            name: Some(command.id.name()),
            args: command.args.clone(),
            ..Self::new("command")
        }
    }

    /// Map a session event; connection bookkeeping yields `None`.
    pub fn from_event(event: &SessionEvent) -> Option<Self> {
        match event {
            SessionEvent::CommandReceived(command) => Some(Self::command(command)),
            SessionEvent::InputTriggered { module_id, value } => Some(Self {
                module_id: Some(*module_id),
                value: *value,
                ..Self::new("trigger")
            }),
            SessionEvent::Log(message) => Some(Self {
                message: Some(message.clone()),
                ..Self::new("log")
            }),
            SessionEvent::Connected(_) | SessionEvent::Disconnected => None,
        }
    }
}

pub fn print_event(event: &EventOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Table => print_table(
            &["EVENT", "DETAIL"],
            vec![vec![event.event.to_string(), event_detail(event)]],
        ),
        OutputFormat::Pretty => println!("{} {}", event.event, event_detail(event)),
    }
}

fn event_detail(event: &EventOutput) -> String {
    if let Some(module_id) = event.module_id {
        return match event.value {
            Some(value) => format!("module={module_id} value={value}"),
            None => format!("module={module_id}"),
        };
    }
    if let Some(message) = &event.message {
        return message.clone();
    }
    match (event.id, event.name) {
        (Some(id), Some(name)) if event.args.is_empty() => format!("{name}({id})"),
        (Some(id), Some(name)) => format!("{name}({id}) {}", event.args.join(",")),
        _ => String::new(),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

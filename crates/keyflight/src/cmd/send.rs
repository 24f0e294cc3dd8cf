use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Instant;

use keyflight_frame::{Command, CommandId};
use keyflight_link::SessionEvent;

use crate::cmd::{connect, parse_duration, SendArgs};
use crate::exit::{link_error, CliResult, SUCCESS};
use crate::output::{print_event, EventOutput, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait = parse_duration(&args.wait)?;
    let command = Command::new(CommandId::from(args.id), args.args.iter().map(String::as_str));
    if !command.id.is_known() {
        tracing::warn!(id = args.id, "sending unknown command id");
    }

    let (session, _identity, _logs) = connect(&args.port, &args.connection)?;

    let (tx, rx) = mpsc::channel();
    let _replies = session.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });

    session
        .send_command(&command)
        .map_err(|err| link_error("send failed", err))?;
    tracing::debug!(frame = %command, "sent");

    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(SessionEvent::Disconnected) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(SessionEvent::Log(_)) => {}
            Ok(event) => {
                if let Some(output) = EventOutput::from_event(&event) {
                    print_event(&output, format);
                }
            }
            Err(RecvTimeoutError::Timeout) => break,
        }
    }

    session.disconnect();
    Ok(SUCCESS)
}

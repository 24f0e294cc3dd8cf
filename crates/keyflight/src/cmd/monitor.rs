use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use keyflight_link::SessionEvent;
use tracing::info;

use crate::cmd::{connect, MonitorArgs};
use crate::exit::{CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_event, EventOutput, OutputFormat};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let (session, identity, _logs) = connect(&args.port, &args.connection)?;
    info!(
        board = %identity.board_type,
        firmware = %identity.firmware_version,
        "monitoring {}",
        args.port
    );

    let (tx, rx) = mpsc::channel();
    let _events = session.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });

    let mut printed = 0u64;
    while running.load(Ordering::SeqCst) {
        let event = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if event == SessionEvent::Disconnected {
            return Err(CliError::new(FAILURE, "device disconnected"));
        }
        // Log lines already go to stderr through tracing.
        if matches!(event, SessionEvent::Log(_)) {
            continue;
        }
        let Some(output) = EventOutput::from_event(&event) else {
            continue;
        };

        print_event(&output, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    session.disconnect();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

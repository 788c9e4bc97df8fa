use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use lenframe_peer::{RegistryConfig, RegistryEvent, RegistrySlot, ServerRegistry};
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, spawn_console, ConsoleCommand, ServeArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_registry_event, print_report, OutputFormat};

const EVENT_POLL: Duration = Duration::from_millis(100);

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = RegistryConfig::new(args.addr.as_str())
        .with_identity(args.identity.into())
        .with_frame_timeout(Some(parse_duration(&args.frame_timeout)?))
        .with_broadcast_concurrency(args.concurrency);

    let slot = RegistrySlot::new();
    let registry = slot
        .obtain(config)
        .map_err(|err| peer_error("bind failed", err))?;
    eprintln!("listening on {}", registry.local_addr());

    let running = install_ctrlc_handler()?;
    let events = registry.subscribe();
    let mut console = Some(spawn_console()?);
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(EVENT_POLL) {
            Ok(event) => {
                let is_message = matches!(event, RegistryEvent::Message { .. });
                print_registry_event(&event, format);
                if is_message {
                    printed = printed.saturating_add(1);
                    if args.count.is_some_and(|count| printed >= count) {
                        break;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if !handle_console(&mut console, &registry, format) {
            break;
        }
    }

    slot.release();
    Ok(SUCCESS)
}

/// Apply pending stdin commands. Returns false when the operator quits.
fn handle_console(
    console: &mut Option<Receiver<String>>,
    registry: &ServerRegistry,
    format: OutputFormat,
) -> bool {
    let Some(lines) = console.as_ref() else {
        return true;
    };

    loop {
        let line = match lines.try_recv() {
            Ok(line) => line,
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => {
                *console = None;
                return true;
            }
        };

        match ConsoleCommand::parse(&line) {
            Ok(ConsoleCommand::Send(text)) => match registry.broadcast(&text) {
                Ok(report) => print_report(&report, format),
                Err(err) => warn!(error = %err, "broadcast failed"),
            },
            Ok(ConsoleCommand::Quit | ConsoleCommand::Stop) => {
                info!("stopping on operator request");
                return false;
            }
            Ok(ConsoleCommand::Restart) => warn!("restart applies to connect only"),
            Err(reason) => warn!(%reason, "ignored console input"),
        }
    }
}

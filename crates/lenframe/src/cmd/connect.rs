use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use lenframe_peer::{ClientConfig, ClientEvent, ClientSupervisor};
use lenframe_transport::{resolve, ProbeMode};
use tracing::{info, warn};

use crate::cmd::{install_ctrlc_handler, parse_duration, spawn_console, ConnectArgs, ConsoleCommand};
use crate::exit::{peer_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_client_event, OutputFormat};

const EVENT_POLL: Duration = Duration::from_millis(100);

/// What the operator asked for on stdin.
enum Action {
    Continue,
    Stop,
    Restart,
    Quit,
}

struct Session {
    client: Option<ClientSupervisor>,
    events: Option<Receiver<ClientEvent>>,
}

impl Session {
    fn start(config: &ClientConfig) -> CliResult<Self> {
        let client = ClientSupervisor::start(config.clone())
            .map_err(|err| peer_error("start failed", err))?;
        let events = client.subscribe();
        Ok(Self {
            client: Some(client),
            events: Some(events),
        })
    }

    fn stop(&mut self) {
        if let Some(client) = self.client.take() {
            client.stop();
        }
        self.events = None;
    }
}

pub fn run(args: ConnectArgs, format: OutputFormat) -> CliResult<i32> {
    let endpoint = resolve(&args.addr).map_err(|err| transport_error("bad address", err))?;
    let probe = if args.heartbeat {
        ProbeMode::Heartbeat
    } else {
        ProbeMode::ZeroByte
    };
    let config = ClientConfig::new(endpoint)
        .with_tick_interval(parse_duration(&args.tick)?)
        .with_check_every_ticks(args.check_every)
        .with_connect_timeout(parse_duration(&args.connect_timeout)?)
        .with_probe(probe);

    let running = install_ctrlc_handler()?;
    let mut console = Some(spawn_console()?);
    let mut session = Session::start(&config)?;
    let mut printed = 0usize;

    while running.load(Ordering::SeqCst) {
        if let Some(events) = &session.events {
            match events.recv_timeout(EVENT_POLL) {
                Ok(event) => {
                    print_client_event(&event, format);
                    if matches!(event, ClientEvent::Message { .. }) {
                        printed = printed.saturating_add(1);
                        if args.count.is_some_and(|count| printed >= count) {
                            break;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => session.events = None,
            }
        } else {
            std::thread::sleep(EVENT_POLL);
        }

        match next_action(&mut console, &session) {
            Action::Continue => {}
            Action::Stop => {
                info!("supervisor stopped; `restart` to reconnect");
                session.stop();
            }
            Action::Restart => {
                session.stop();
                session = Session::start(&config)?;
                info!(%endpoint, "supervisor restarted");
            }
            Action::Quit => break,
        }
    }

    session.stop();
    Ok(SUCCESS)
}

fn next_action(console: &mut Option<Receiver<String>>, session: &Session) -> Action {
    let Some(lines) = console.as_ref() else {
        return Action::Continue;
    };

    loop {
        let line = match lines.try_recv() {
            Ok(line) => line,
            Err(TryRecvError::Empty) => return Action::Continue,
            Err(TryRecvError::Disconnected) => {
                *console = None;
                return Action::Continue;
            }
        };

        match ConsoleCommand::parse(&line) {
            Ok(ConsoleCommand::Send(text)) => match &session.client {
                Some(client) => {
                    if let Err(err) = client.send(&text) {
                        warn!(error = %err, "send failed");
                    }
                }
                None => warn!("supervisor is stopped; `restart` first"),
            },
            Ok(ConsoleCommand::Stop) => return Action::Stop,
            Ok(ConsoleCommand::Restart) => return Action::Restart,
            Ok(ConsoleCommand::Quit) => return Action::Quit,
            Err(reason) => warn!(%reason, "ignored console input"),
        }
    }
}

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use lenframe_peer::IdentityMode;

use crate::exit::{CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod connect;
pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept peers, print their messages, broadcast stdin `send` lines.
    Serve(ServeArgs),
    /// Keep a connection to a server alive and print what arrives.
    Connect(ConnectArgs),
    /// Connect, send one message and exit.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Connect(args) => connect::run(args, format),
        Command::Send(args) => send::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum Identity {
    /// One peer per remote IP address.
    Address,
    /// One peer per remote IP address and port.
    AddressPort,
}

impl From<Identity> for IdentityMode {
    fn from(identity: Identity) -> Self {
        match identity {
            Identity::Address => IdentityMode::Address,
            Identity::AddressPort => IdentityMode::AddressAndPort,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (e.g. 0.0.0.0:11000).
    #[arg(env = "LENFRAME_LISTEN")]
    pub addr: String,
    /// How peers are deduplicated.
    #[arg(long, value_enum, default_value = "address")]
    pub identity: Identity,
    /// Abandon a partially received frame after this long (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub frame_timeout: String,
    /// Maximum concurrent sends per broadcast.
    #[arg(long, default_value_t = lenframe_peer::DEFAULT_BROADCAST_CONCURRENCY)]
    pub concurrency: usize,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Server address (e.g. 127.0.0.1:11000).
    #[arg(env = "LENFRAME_SERVER")]
    pub addr: String,
    /// Idle ticks between liveness checks.
    #[arg(long, default_value_t = lenframe_peer::DEFAULT_CHECK_EVERY_TICKS)]
    pub check_every: u32,
    /// Monitor tick period (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub tick: String,
    /// Bounded wait for each connect attempt.
    #[arg(long, default_value = "10s")]
    pub connect_timeout: String,
    /// Probe with raw `Heartbeat` bytes instead of a zero-length send.
    #[arg(long)]
    pub heartbeat: bool,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Server address (e.g. 127.0.0.1:11000).
    #[arg(env = "LENFRAME_SERVER")]
    pub addr: String,
    /// Message text.
    #[arg(long)]
    pub data: String,
    /// Follow the message with the close frame.
    #[arg(long)]
    pub close: bool,
    /// Bounded wait for the connect.
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// A line typed on stdin while a long-running command is active.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Send(String),
    Stop,
    Restart,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (word, rest) = line
            .trim_start()
            .split_once(' ')
            .unwrap_or((line.trim(), ""));
        let rest = rest.trim_start();
        match word.to_ascii_lowercase().as_str() {
            "send" if !rest.is_empty() => Ok(Self::Send(rest.to_string())),
            "send" => Err("usage: send <text>".to_string()),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "quit" | "exit" => Ok(Self::Quit),
            "" => Err("empty command".to_string()),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

/// Read stdin lines on a background thread.
///
/// The channel disconnects at end of input; callers keep running.
pub fn spawn_console() -> CliResult<Receiver<String>> {
    let (tx, rx) = channel();
    thread::Builder::new()
        .name("lenframe-console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .map_err(|err| CliError::new(INTERNAL, format!("console thread failed: {err}")))?;
    Ok(rx)
}

pub fn install_ctrlc_handler() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
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
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

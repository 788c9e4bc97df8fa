use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use lenframe_peer::{BroadcastReport, ClientEvent, RegistryEvent};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// One printable line: what happened, who it concerns, and the detail.
struct Row {
    kind: &'static str,
    peer: String,
    detail: String,
    is_message: bool,
}

impl From<&ClientEvent> for Row {
    fn from(event: &ClientEvent) -> Self {
        match event {
            ClientEvent::Message { text } => Row {
                kind: "message",
                peer: "server".to_string(),
                detail: text.clone(),
                is_message: true,
            },
            ClientEvent::Status { connected, reason } => Row {
                kind: if *connected { "connected" } else { "disconnected" },
                peer: "server".to_string(),
                detail: reason.clone(),
                is_message: false,
            },
        }
    }
}

impl From<&RegistryEvent> for Row {
    fn from(event: &RegistryEvent) -> Self {
        match event {
            RegistryEvent::Message { from, text } => Row {
                kind: "message",
                peer: from.to_string(),
                detail: text.clone(),
                is_message: true,
            },
            RegistryEvent::PeerAdmitted { addr, replaced } => Row {
                kind: "admitted",
                peer: addr.to_string(),
                detail: replaced
                    .map(|old| format!("replaced {old}"))
                    .unwrap_or_default(),
                is_message: false,
            },
            RegistryEvent::PeerEvicted { addr, reason } => Row {
                kind: "evicted",
                peer: addr.to_string(),
                detail: reason.to_string(),
                is_message: false,
            },
        }
    }
}

#[derive(Serialize)]
struct Stamped<'a, T: Serialize> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a T,
}

pub fn print_client_event(event: &ClientEvent, format: OutputFormat) {
    print_event(event, Row::from(event), format);
}

pub fn print_registry_event(event: &RegistryEvent, format: OutputFormat) {
    print_event(event, Row::from(event), format);
}

fn print_event<T: Serialize>(event: &T, row: Row, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(event),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "PEER", "DETAIL"])
                .add_row(vec![row.kind.to_string(), row.peer, row.detail]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if row.detail.is_empty() {
                println!("[{}] {}", row.kind, row.peer);
            } else {
                println!("[{}] {}: {}", row.kind, row.peer, row.detail);
            }
        }
        OutputFormat::Raw => {
            if row.is_message {
                print_raw(&row.detail);
            }
        }
    }
}

pub fn print_report(report: &BroadcastReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PEER", "RESULT"]);
            for addr in &report.delivered {
                table.add_row(vec![addr.to_string(), "delivered".to_string()]);
            }
            for (addr, reason) in &report.failed {
                table.add_row(vec![addr.to_string(), format!("failed: {reason}")]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => println!(
            "[broadcast] delivered={} failed={}",
            report.delivered.len(),
            report.failed.len()
        ),
        OutputFormat::Raw => {}
    }
}

fn print_json<T: Serialize>(event: &T) {
    let out = Stamped {
        timestamp: now_unix_seconds(),
        event,
    };
    println!(
        "{}",
        serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(text: &str) {
    let mut out = std::io::stdout();
    let _ = writeln!(out, "{text}");
    let _ = out.flush();
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

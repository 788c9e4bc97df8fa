//! Minimal echo server: every message from any peer is broadcast back to
//! all connected peers.
//!
//! Run with:
//!   cargo run --example echo-server --features peer -- 127.0.0.1:11000
//!
//! In another terminal:
//!   cargo run --features cli -- connect 127.0.0.1:11000
//! then type `send hello`.

use lenframe::peer::{IdentityMode, RegistryConfig, RegistryEvent, ServerRegistry};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:11000".to_string());

    let config = RegistryConfig::new(addr).with_identity(IdentityMode::AddressAndPort);
    let registry = ServerRegistry::bind(config)?;
    eprintln!("Listening on {}", registry.local_addr());

    for event in registry.subscribe() {
        match event {
            RegistryEvent::Message { from, text } => {
                eprintln!("{from}: {text}");
                let report = registry.broadcast(&text)?;
                eprintln!("echoed to {} peer(s)", report.delivered.len());
            }
            RegistryEvent::PeerAdmitted { addr, .. } => eprintln!("Peer connected: {addr}"),
            RegistryEvent::PeerEvicted { addr, reason } => {
                eprintln!("Peer gone: {addr} ({reason})")
            }
        }
    }

    Ok(())
}

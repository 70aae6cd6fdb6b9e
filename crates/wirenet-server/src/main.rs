//! Wirenet server binary.
//!
//! # Usage
//!
//! ```bash
//! # Symmetric wiring from connections.txt on the default port
//! wirenet-server --wiring connections.txt
//!
//! # Directed wiring, verbose routing log
//! wirenet-server --bind 0.0.0.0:23456 --wiring plant.txt --directed --log-level debug
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wirenet_core::WiringMode;
use wirenet_server::{DEFAULT_OUTBOUND_CAPACITY, RouterEvent, Server, ServerRuntimeConfig};

/// Wirenet terminal router
#[derive(Parser, Debug)]
#[command(name = "wirenet-server")]
#[command(about = "Route terminal state changes between wirenet clients")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:23456")]
    bind: String,

    /// Path to the wiring table
    #[arg(short, long, default_value = "connections.txt")]
    wiring: PathBuf,

    /// Treat wiring entries as one-way (terminal -> peers only)
    #[arg(long)]
    directed: bool,

    /// Messages queued per client before it is dropped as unresponsive
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    outbound_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Wirenet server starting");
    tracing::info!("Binding to {}", args.bind);

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        wiring_path: Some(args.wiring),
        wiring_mode: if args.directed { WiringMode::Directed } else { WiringMode::Symmetric },
        outbound_capacity: args.outbound_capacity,
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    let mut events = server.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Event log skipped {} events", missed);
                },
                Err(RecvError::Closed) => break,
            }
        }
    });

    server.run().await?;

    Ok(())
}

fn log_event(event: &RouterEvent) {
    match event {
        RouterEvent::ClientNameRegistered { connection, client } => {
            tracing::debug!(%connection, %client, "client name registered");
        },
        RouterEvent::ClientNameUnregistered { connection, client } => {
            tracing::debug!(%connection, ?client, "client name unregistered");
        },
        RouterEvent::TerminalRegistered { client, terminal, peers, .. } => {
            tracing::debug!(?client, %terminal, ?peers, "terminal registered");
        },
        RouterEvent::TerminalUnregistered { terminal } => {
            tracing::debug!(%terminal, "terminal unregistered");
        },
        RouterEvent::TerminalStateChanged { client, terminal, state } => {
            tracing::debug!(?client, %terminal, %state, "terminal changed state");
        },
    }
}

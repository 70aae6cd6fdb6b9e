//! Wirenet reference device binary.
//!
//! # Usage
//!
//! ```bash
//! # Hold Q1.1 at mains voltage
//! wirenet-device --name supply source --terminal Q1.1 --state 230VAC --inverted 0VAC
//!
//! # A DC relay with two contacts
//! wirenet-device --name relays relay --zero 0VDC --coil-in K1.A1 --coil-out K1.A2 \
//!     --contact K1.11:K1.14 --contact K1.21:K1.24
//! ```

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wirenet_client::{
    ClientConfig, ClientRuntime, EngineError,
    devices::{CircuitBreaker, Load, Relay, Source, Supply},
};
use wirenet_proto::State;

/// Wirenet reference device
#[derive(Parser, Debug)]
#[command(name = "wirenet-device")]
#[command(about = "Run one reference device against a wirenet router")]
#[command(version)]
struct Args {
    /// Router address
    #[arg(short, long, default_value = "127.0.0.1:23456")]
    server: String,

    /// Client name announced to the router
    #[arg(short, long, default_value = "default")]
    name: String,

    /// Milliseconds between connection attempts
    #[arg(long, default_value = "500")]
    retry_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    device: DeviceKind,
}

#[derive(Subcommand, Debug)]
enum DeviceKind {
    /// Fixed-voltage source
    Source {
        /// Terminal to drive
        #[arg(long)]
        terminal: String,
        /// Voltage to hold
        #[arg(long)]
        state: String,
        /// Voltage that means short circuit
        #[arg(long)]
        inverted: String,
    },

    /// Two-terminal load
    Load {
        /// Power terminal
        #[arg(long)]
        power: String,
        /// Zero-reference terminal
        #[arg(long)]
        zero: String,
        /// Power level that turns the load on
        #[arg(long)]
        on: String,
        /// Expected zero-reference level
        #[arg(long)]
        off: String,
    },

    /// Circuit breaker
    Breaker {
        /// Input terminal
        #[arg(long)]
        input: String,
        /// Output terminal
        #[arg(long)]
        output: String,
        /// Start with the breaker open
        #[arg(long)]
        open: bool,
    },

    /// Relay with normally-open contacts
    Relay {
        /// Zero level of the coil supply (0VAC or 0VDC)
        #[arg(long)]
        zero: String,
        /// Coil input terminal
        #[arg(long)]
        coil_in: String,
        /// Coil output terminal
        #[arg(long)]
        coil_out: String,
        /// Contact pair as INPUT:OUTPUT (repeatable)
        #[arg(long = "contact", value_parser = parse_contact, required = true)]
        contacts: Vec<(String, String)>,
    },
}

fn parse_contact(s: &str) -> Result<(String, String), String> {
    match s.split_once(':') {
        Some((input, output)) if !input.is_empty() && !output.is_empty() => {
            Ok((input.to_string(), output.to_string()))
        },
        _ => Err(format!("expected INPUT:OUTPUT, got {s}")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ClientConfig {
        server_address: args.server,
        client_name: args.name,
        retry_interval: Duration::from_millis(args.retry_ms),
        ..Default::default()
    };
    let mut runtime = ClientRuntime::new(config);

    match args.device {
        DeviceKind::Source { terminal, state, inverted } => {
            runtime
                .install(|engine| {
                    Source::install(
                        engine,
                        terminal,
                        State::from_token(&state),
                        State::from_token(&inverted),
                    )
                })
                .await?;
        },
        DeviceKind::Load { power, zero, on, off } => {
            runtime
                .install(|engine| {
                    Load::install(
                        engine,
                        power,
                        zero,
                        State::from_token(&on),
                        State::from_token(&off),
                    )
                })
                .await?;
        },
        DeviceKind::Breaker { input, output, open } => {
            runtime.install(|engine| CircuitBreaker::install(engine, input, output, !open)).await?;
        },
        DeviceKind::Relay { zero, coil_in, coil_out, contacts } => {
            let supply = Supply::from_zero_state(&State::from_token(&zero)).ok_or_else(|| {
                EngineError::InvalidDevice { reason: format!("no relay supply with zero {zero}") }
            })?;
            runtime
                .install(|engine| Relay::install(engine, supply, coil_in, coil_out, contacts))
                .await?;
        },
    }

    let config = runtime.config();
    tracing::info!("Device {} connecting to {}", config.client_name, config.server_address);

    runtime.run().await?;

    Ok(())
}

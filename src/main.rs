//! display-control
//!
//! Command-line front end for controlling network displays.
//!
//! # Architecture Overview
//!
//! ```text
//!   CLI (clap)
//!     │
//!     ▼
//!   DeviceRegistry ──▶ DisplayController ──▶ PowerStateMachine
//!                              │
//!                              ▼
//!                       RetryExecutor ──▶ CircuitBreaker (per endpoint)
//!                              │
//!                              ▼
//!                       ProtocolClient ──▶ ConnectionPool ──▶ display
//! ```

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use display_control::config::load_config;
use display_control::device::{endpoint_for, DeviceRegistry, Operation};
use display_control::health::diagnose;
use display_control::observability::{logging, metrics};
use display_control::resilience::Timeouts;

#[derive(Parser)]
#[command(name = "display-control")]
#[command(about = "Control network displays over PJLink", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "display-control.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured devices
    Devices,
    /// Run one operation on a device (e.g. `run hall set_input 31`)
    Run {
        device: String,
        operation: String,
        arg: Option<String>,
    },
    /// Check address, reachability, port and handshake for a device
    Diagnose { device: String },
}

#[derive(Serialize)]
struct DeviceSummary<'a> {
    name: &'a str,
    host: &'a str,
    port: u16,
    family: String,
    authenticated: bool,
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to render output: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init_logging(&config.observability);
    tracing::debug!(config = %cli.config.display(), devices = config.devices.len(), "display-control starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let config = Arc::new(config);
    match cli.command {
        Commands::Devices => {
            let devices: Vec<DeviceSummary<'_>> = config
                .devices
                .iter()
                .map(|d| DeviceSummary {
                    name: &d.name,
                    host: &d.host,
                    port: d.port,
                    family: d.family.to_string(),
                    authenticated: d.password.is_some(),
                })
                .collect();
            print_json(&devices);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            device,
            operation,
            arg,
        } => {
            let operation = Operation::parse(&operation, arg.as_deref())?;
            let registry = DeviceRegistry::new(Arc::clone(&config));
            let outcome = registry.execute(&device, operation).await;

            let record = outcome.audit_record(Some(&device));
            print_json(&serde_json::json!({
                "record": record,
                "output": outcome.value(),
            }));

            if let Some(message) = outcome.error_message() {
                eprintln!("{message}");
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Diagnose { device } => {
            let Some(entry) = config.device(&device) else {
                eprintln!("unknown device: {device}");
                return Ok(ExitCode::FAILURE);
            };
            let report = diagnose(&endpoint_for(entry), Timeouts::from(&config.timeouts)).await;
            print_json(&report);
            Ok(if report.all_passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

// ABOUTME: CLI launcher: parses --settings, loads and validates configuration,
// ABOUTME: wires up logging, and runs the Bridge until a termination signal

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use velbus_bridge::settings::Settings;
use velbus_bridge::Bridge;

#[derive(Parser)]
#[command(name = "velbus-bridge", about = "Bridges a Velbus RS-485 field bus to TCP")]
struct Cli {
    /// Path to a JSON settings file. Absent uses built-in defaults.
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => match Settings::load(path) {
            Ok(settings) => settings,
            Err(err) => {
                eprintln!("invalid settings: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => Settings::defaults(),
    };

    settings.logging.init();

    let bridge = match Bridge::new(settings) {
        Ok(bridge) => bridge,
        Err(err) => {
            tracing::error!(%err, "failed to start bridge");
            return ExitCode::FAILURE;
        }
    };

    bridge.start().await;
    tracing::info!("velbus-bridge running");

    wait_for_termination().await;

    tracing::info!("shutting down");
    bridge.stop().await;

    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

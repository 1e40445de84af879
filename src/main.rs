// src/main.rs

use clap::Parser;
use flaschen_taschen::{config::Cli, orchestrator};
use log::info;

/// Main entry point for the `ft-server` binary.
fn main() -> anyhow::Result<()> {
    // Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let config = Cli::parse().into_config()?;
    info!("Starting ft-server...");
    orchestrator::run(&config)
}

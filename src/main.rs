// src/main.rs

//! The main entry point for the RepGuard binary.

use anyhow::Result;
use clap::Parser;
use repguard::cli::{self, Cli, Component};
use repguard::core::daemon::daemonize;
use repguard::cli::service::DaemonAction;
use std::sync::Arc;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Daemonization must happen before the async runtime spins up worker
    // threads; forking a threaded process is not survivable.
    if let Component::Daemon {
        action: DaemonAction::Start { no_detach: false },
    } = &cli.command
    {
        let config = match cli.require_config() {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                e.exit_code().exit();
            }
        };
        let config_dir = config
            .config_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from("/"));
        if let Err(e) = daemonize(&config_dir) {
            eprintln!("{e}");
            e.exit_code().exit();
        }
    }

    // Logging with a reloadable filter: SIGHUP re-applies the configured
    // log_level without restarting.
    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        cli.log_level
            .clone()
            .unwrap_or_else(|| "info,repguard::core::monitor=debug".to_string())
    });
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
                .with_writer(std::io::stderr),
        )
        .init();
    let _reload_handle = Arc::new(reload_handle);

    let runtime = tokio::runtime::Runtime::new()?;
    let exit_code = runtime.block_on(cli::dispatch(cli));
    drop(runtime);
    exit_code.exit();
}

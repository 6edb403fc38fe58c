// src/cli/service.rs

//! `service pause/unpause/status` — fleet-wide supervisor control — and
//! `daemon start/stop` for the local supervisor.

use crate::cli::Cli;
use crate::config::NodeConfig;
use crate::core::catalog::{Catalog, NodeRecord};
use crate::core::daemon;
use crate::core::daemon::lifecycle::{PidFile, pid_is_alive, send_signal};
use crate::core::errors::{ExitCode, RepGuardError};
use crate::core::gateway::EngineClient;
use crate::core::peer::PeerClient;
use clap::Subcommand;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Subcommand, Debug)]
pub enum ServiceAction {
    /// Suppress automatic failover on every reachable supervisor
    Pause,
    /// Resume automatic failover on every reachable supervisor
    Unpause {
        /// Keep going past supervisors that cannot be reached
        #[arg(long = "repguardd-force-unpause")]
        force: bool,
    },
    /// Show each node's supervisor state
    Status,
}

#[derive(Subcommand, Debug)]
pub enum DaemonAction {
    /// Start the supervisor for the local node
    Start {
        /// Stay attached to the terminal instead of daemonizing
        #[arg(long)]
        no_detach: bool,
    },
    /// Signal a running supervisor to exit
    Stop {
        /// Wait for the supervisor to exit before returning
        #[arg(long)]
        wait: bool,
    },
}

pub async fn run_service(cli: &Cli, action: &ServiceAction) -> Result<ExitCode, RepGuardError> {
    let config = cli.require_config()?;
    let local = EngineClient::connect(&config.conninfo, config.connection_timeout).await?;
    let catalog = Catalog::new(&local);
    let nodes: Vec<NodeRecord> = catalog
        .get_all_nodes()
        .await?
        .into_iter()
        .filter(|n| n.active)
        .collect();

    match action {
        ServiceAction::Pause => set_paused_everywhere(&config, &nodes, true, false).await,
        ServiceAction::Unpause { force } => {
            set_paused_everywhere(&config, &nodes, false, *force).await
        }
        ServiceAction::Status => {
            println!(
                "{:<4} {:<16} {:<12} {:<8} PID",
                "ID", "Name", "Supervisor", "Paused"
            );
            for node in &nodes {
                match PeerClient::connect(&node.peer_addr, config.connection_timeout).await {
                    Ok(mut peer) => {
                        let (running, pid) = peer.is_running().await.unwrap_or((false, None));
                        let paused = peer.is_paused().await.unwrap_or(false);
                        println!(
                            "{:<4} {:<16} {:<12} {:<8} {}",
                            node.node_id,
                            node.node_name,
                            if running { "running" } else { "stopped" },
                            paused,
                            pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
                        );
                    }
                    Err(_) => {
                        println!(
                            "{:<4} {:<16} {:<12} {:<8} -",
                            node.node_id, node.node_name, "unreachable", "-"
                        );
                    }
                }
            }
            Ok(ExitCode::Success)
        }
    }
}

async fn set_paused_everywhere(
    config: &NodeConfig,
    nodes: &[NodeRecord],
    paused: bool,
    force: bool,
) -> Result<ExitCode, RepGuardError> {
    let verb = if paused { "pause" } else { "unpause" };
    let mut failures = 0;
    for node in nodes {
        match PeerClient::connect(&node.peer_addr, config.connection_timeout).await {
            Ok(mut peer) => {
                peer.set_paused(paused).await?;
                info!("node {} supervisor {}d", node.node_id, verb);
            }
            Err(e) => {
                failures += 1;
                if force {
                    warn!("cannot {} supervisor on node {}: {}", verb, node.node_id, e);
                } else {
                    return Err(RepGuardError::Peer(format!(
                        "cannot {verb} supervisor on node {}: {e}",
                        node.node_id
                    )));
                }
            }
        }
    }
    if failures > 0 {
        warn!("{failures} supervisor(s) were unreachable");
    }
    Ok(ExitCode::Success)
}

pub async fn run_daemon(cli: &Cli, action: &DaemonAction) -> Result<ExitCode, RepGuardError> {
    let config = cli.require_config()?;
    match action {
        // Daemonization happened in main() before the runtime started; by
        // the time we are here there is only the run loop to enter.
        DaemonAction::Start { .. } => {
            daemon::run(config).await?;
            Ok(ExitCode::Success)
        }
        DaemonAction::Stop { wait } => {
            let pid_path = config.pid_file_path();
            let pid = PidFile::read(&pid_path)?;
            if !pid_is_alive(pid) {
                return Err(RepGuardError::PidFile(format!(
                    "\"{}\" names process {pid}, which is not running",
                    pid_path.display()
                )));
            }
            send_signal(pid, libc::SIGTERM)?;
            info!("sent SIGTERM to supervisor process {}", pid);
            if *wait {
                let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
                while pid_is_alive(pid) {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(RepGuardError::Internal(format!(
                            "supervisor process {pid} did not exit within 30s"
                        )));
                    }
                    sleep(Duration::from_millis(200)).await;
                }
                info!("supervisor process {} exited", pid);
            }
            Ok(ExitCode::Success)
        }
    }
}

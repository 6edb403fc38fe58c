// src/cli/node.rs

//! `node status/check/rejoin/service`: local node inspection and repair.

use crate::cli::Cli;
use crate::config::NodeConfig;
use crate::core::catalog::{Catalog, NodeType, RecordStatus};
use crate::core::errors::{ExitCode, RepGuardError};
use crate::core::failover::run_local_command;
use crate::core::gateway::EngineClient;
use crate::core::lsn::Lsn;
use crate::core::rejoin::{RejoinOptions, read_control_file, run_rejoin};
use clap::{Subcommand, ValueEnum};

#[derive(Subcommand, Debug)]
pub enum NodeAction {
    /// Report the local node's role, upstream and replication state
    Status {
        /// Report whether the engine is shut down cleanly, and its final
        /// checkpoint position (used remotely during switchover)
        #[arg(long)]
        is_shutdown_cleanly: bool,
        #[arg(long)]
        csv: bool,
    },
    /// Run health checks against the local node
    Check {
        /// Single-line monitoring-plugin output with OK/WARNING/CRITICAL
        #[arg(long)]
        nagios: bool,
        /// `name=value` output for scripts
        #[arg(long)]
        optformat: bool,
    },
    /// Rejoin this (shut down) node to the cluster
    Rejoin {
        #[arg(long)]
        dry_run: bool,
        /// Rewind first when the divergence requires it; the optional value
        /// overrides the rewind executable
        #[arg(long, value_name = "PATH")]
        force_rewind: Option<Option<String>>,
    },
    /// Run a configured service-control command for the local engine
    Service {
        #[arg(long, value_enum)]
        action: ServiceCommand,
        /// Issue a checkpoint before a stop, shortening shutdown
        #[arg(long)]
        checkpoint: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ServiceCommand {
    Start,
    Stop,
    Restart,
    Reload,
    Promote,
}

pub async fn run_node(cli: &Cli, action: &NodeAction) -> Result<ExitCode, RepGuardError> {
    let config = cli.require_config()?;
    match action {
        NodeAction::Status {
            is_shutdown_cleanly,
            csv,
        } => {
            if *is_shutdown_cleanly {
                shutdown_state_report(&config).await
            } else {
                status_report(&config, *csv).await
            }
        }
        NodeAction::Check { nagios, optformat } => check(&config, *nagios, *optformat).await,
        NodeAction::Rejoin {
            dry_run,
            force_rewind,
        } => {
            let seed_conninfo = cli.conninfo_override().ok_or_else(|| {
                RepGuardError::Config(
                    "node rejoin needs a surviving node's conninfo via -d/-h".to_string(),
                )
            })?;
            let options = RejoinOptions {
                dry_run: *dry_run,
                seed_conninfo,
                force_rewind: force_rewind.clone(),
            };
            run_rejoin(&config, &options).await?;
            Ok(ExitCode::Success)
        }
        NodeAction::Service { action, checkpoint } => service(&config, *action, *checkpoint).await,
    }
}

/// `node status --is-shutdown-cleanly`: parsed remotely by the switchover
/// orchestrator, so the format is part of the operator-command contract.
async fn shutdown_state_report(config: &NodeConfig) -> Result<ExitCode, RepGuardError> {
    if EngineClient::server_reachable(&config.conninfo, config.connection_timeout).await {
        println!("state: running");
        return Ok(ExitCode::DbConn);
    }
    let control = read_control_file(config).await?;
    if control.cleanly_shut_down {
        println!("state: clean");
        println!("checkpoint_lsn: {}", control.checkpoint_lsn);
        Ok(ExitCode::Success)
    } else {
        println!("state: unclean");
        Ok(ExitCode::DbConn)
    }
}

async fn status_report(config: &NodeConfig, csv: bool) -> Result<ExitCode, RepGuardError> {
    let local = EngineClient::connect(&config.conninfo, config.connection_timeout).await?;
    let catalog = Catalog::new(&local);
    let record = catalog.get_node(config.node_id).await.into_result(|| {
        RepGuardError::Catalog(format!("node {} is not registered", config.node_id))
    })?;

    let in_recovery = local.is_in_recovery().await?;
    let positions = local.wal_positions().await?;
    let role = if in_recovery { "standby" } else { "primary" };
    let upstream = match record.upstream_node_id {
        Some(id) => match catalog.get_node(id).await {
            RecordStatus::Found(up) => format!("{} (node {})", up.node_name, up.node_id),
            _ => format!("node {id} (unknown)"),
        },
        None => "(none)".to_string(),
    };
    let slot_count = local
        .query_one("SELECT count(*) FROM pg_catalog.pg_replication_slots", &[])
        .await
        .map(|row| row.get::<_, i64>(0))
        .unwrap_or(0);
    let downstream = local.downstream_nodes().await.unwrap_or_default();

    if csv {
        println!(
            "{},{},{},{},{},{},{}",
            record.node_id,
            record.node_name,
            role,
            record.active,
            record.upstream_node_id.unwrap_or(0),
            slot_count,
            downstream.len()
        );
    } else {
        println!("Node \"{}\" (ID: {}):", record.node_name, record.node_id);
        println!("  Role: {role}");
        println!("  Active: {}", record.active);
        println!("  Upstream: {upstream}");
        println!("  Location: {}", record.location);
        println!("  Priority: {}", record.priority);
        println!(
            "  WAL position: {}",
            positions.newest().unwrap_or(Lsn::INVALID)
        );
        println!("  Replication slots: {slot_count}");
        println!("  Attached downstream nodes: {}", downstream.len());
        for node in &downstream {
            println!("    {} ({})", node.application_name, node.state);
        }
    }
    Ok(ExitCode::Success)
}

/// Nagios-style exit levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CheckLevel {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl CheckLevel {
    fn label(self) -> &'static str {
        match self {
            CheckLevel::Ok => "OK",
            CheckLevel::Warning => "WARNING",
            CheckLevel::Critical => "CRITICAL",
            CheckLevel::Unknown => "UNKNOWN",
        }
    }

    fn exit(self) -> ExitCode {
        match self {
            CheckLevel::Ok => ExitCode::Success,
            // Monitoring plugins expect 1/2/3 here; BadConfig and DbConn
            // happen to be 1 and 2, and Unknown maps onto DbQuery (3).
            CheckLevel::Warning => ExitCode::BadConfig,
            CheckLevel::Critical => ExitCode::DbConn,
            CheckLevel::Unknown => ExitCode::DbQuery,
        }
    }
}

async fn check(
    config: &NodeConfig,
    nagios: bool,
    optformat: bool,
) -> Result<ExitCode, RepGuardError> {
    let mut level = CheckLevel::Ok;
    let mut details: Vec<String> = Vec::new();

    let local = match EngineClient::connect(&config.conninfo, config.connection_timeout).await {
        Ok(client) => client,
        Err(e) => {
            let message = format!("local engine unreachable: {e}");
            if nagios {
                println!("REPGUARD CRITICAL - {message}");
            } else {
                eprintln!("{message}");
            }
            return Ok(CheckLevel::Critical.exit());
        }
    };

    let in_recovery = local.is_in_recovery().await?;
    let catalog = Catalog::new(&local);
    let record = catalog.get_node(config.node_id).await.into_result(|| {
        RepGuardError::Catalog(format!("node {} is not registered", config.node_id))
    })?;

    // Role agreement between the catalog and the engine.
    let expected_recovery = record.node_type != NodeType::Primary;
    if in_recovery != expected_recovery {
        level = level.max(CheckLevel::Critical);
        details.push(format!(
            "role mismatch: catalog says {} but engine reports in_recovery={}",
            record.node_type, in_recovery
        ));
    } else {
        details.push(format!("role {}", record.node_type));
    }

    // Replication health for standbys.
    if in_recovery {
        if let Some(upstream_id) = record.upstream_node_id {
            match catalog.get_node(upstream_id).await {
                RecordStatus::Found(upstream) => {
                    match EngineClient::connect(&upstream.conninfo, config.connection_timeout)
                        .await
                    {
                        Ok(upstream_client) => {
                            match upstream_client
                                .downstream_state(&record.node_name)
                                .await?
                            {
                                Some(stats) => {
                                    details.push(format!("streaming ({})", stats.state))
                                }
                                None => {
                                    level = level.max(CheckLevel::Critical);
                                    details.push(
                                        "not streaming from the recorded upstream".to_string(),
                                    );
                                }
                            }
                        }
                        Err(_) => {
                            level = level.max(CheckLevel::Warning);
                            details.push("upstream unreachable".to_string());
                        }
                    }
                }
                _ => {
                    level = level.max(CheckLevel::Unknown);
                    details.push("upstream not in catalog".to_string());
                }
            }
        }
    }

    // Slot sanity on primaries.
    if !in_recovery {
        let inactive: i64 = local
            .query_one(
                "SELECT count(*) FROM pg_catalog.pg_replication_slots WHERE NOT active",
                &[],
            )
            .await?
            .get(0);
        if inactive > 0 {
            level = level.max(CheckLevel::Warning);
            details.push(format!("{inactive} inactive replication slot(s)"));
        } else {
            details.push("slots ok".to_string());
        }
    }

    let summary = details.join("; ");
    if nagios {
        println!("REPGUARD {} - {}", level.label(), summary);
    } else if optformat {
        println!("status={}", level.label());
        for (index, detail) in details.iter().enumerate() {
            println!("detail{index}={detail}");
        }
    } else {
        println!("{}: {}", level.label(), summary);
    }
    Ok(level.exit())
}

async fn service(
    config: &NodeConfig,
    action: ServiceCommand,
    checkpoint: bool,
) -> Result<ExitCode, RepGuardError> {
    let command = match action {
        ServiceCommand::Start => config.service_start_command.clone(),
        ServiceCommand::Stop => config.service_stop_command.clone(),
        ServiceCommand::Restart => config.service_restart_command.clone(),
        ServiceCommand::Reload => config.service_reload_command.clone(),
        ServiceCommand::Promote => config
            .effective_promote_command()
            .map(|command| command.to_string()),
    };
    // Without an explicit service command, fall back to driving the engine's
    // control tool directly.
    let command = command.unwrap_or_else(|| {
        let verb = match action {
            ServiceCommand::Start => "start",
            ServiceCommand::Stop => "stop",
            ServiceCommand::Restart => "restart",
            ServiceCommand::Reload => "reload",
            ServiceCommand::Promote => "promote",
        };
        let mut fallback = format!("pg_ctl -D {}", config.data_directory.display());
        if !config.pg_ctl_options.is_empty() {
            fallback.push(' ');
            fallback.push_str(&config.pg_ctl_options);
        }
        fallback.push(' ');
        fallback.push_str(verb);
        fallback
    });

    if checkpoint && matches!(action, ServiceCommand::Stop | ServiceCommand::Restart) {
        if let Ok(local) =
            EngineClient::connect(&config.conninfo, config.connection_timeout).await
        {
            let _ = local.execute("CHECKPOINT", &[]).await;
        }
    }

    run_local_command(&command).await?;
    Ok(ExitCode::Success)
}

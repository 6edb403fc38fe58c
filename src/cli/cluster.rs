// src/cli/cluster.rs

//! `cluster show/event/crosscheck/matrix`: cluster-wide reports.

use crate::cli::Cli;
use crate::config::NodeConfig;
use crate::core::catalog::events::EventKind;
use crate::core::catalog::{Catalog, NodeRecord, NodeType};
use crate::core::errors::{ExitCode, RepGuardError};
use crate::core::gateway::EngineClient;
use crate::core::ssh::{RemoteRunner, host_from_conninfo};
use clap::Subcommand;
use std::str::FromStr;

#[derive(Subcommand, Debug)]
pub enum ClusterAction {
    /// Show the cluster topology with per-node connection health
    Show {
        #[arg(long)]
        csv: bool,
        /// One line per node, no connection probing
        #[arg(long)]
        compact: bool,
    },
    /// Show recent cluster events
    Event {
        #[arg(long, default_value_t = 20)]
        limit: i64,
        /// Ignore --limit and show everything
        #[arg(long)]
        all: bool,
        /// Only show events for this node
        #[arg(long)]
        node_id: Option<i32>,
        /// Only show events of this kind
        #[arg(long = "event")]
        kind: Option<String>,
        #[arg(long)]
        csv: bool,
    },
    /// Probe connectivity from every node to every node (needs SSH)
    Crosscheck {
        #[arg(long)]
        csv: bool,
    },
    /// Probe connectivity from this node to every node
    Matrix {
        #[arg(long)]
        csv: bool,
    },
}

pub async fn run_cluster(cli: &Cli, action: &ClusterAction) -> Result<ExitCode, RepGuardError> {
    let config = cli.require_config()?;
    let conninfo = cli
        .conninfo_override()
        .unwrap_or_else(|| config.conninfo.clone());
    let client = EngineClient::connect(&conninfo, config.connection_timeout).await?;
    let catalog = Catalog::new(&client);
    let nodes = catalog.get_all_nodes().await?;

    match action {
        ClusterAction::Show { csv, compact } => {
            show(&config, &nodes, *csv, *compact).await
        }
        ClusterAction::Event {
            limit,
            all,
            node_id,
            kind,
            csv,
        } => {
            let kind = kind
                .as_deref()
                .map(|name| {
                    EventKind::from_str(name).map_err(|_| {
                        RepGuardError::Config(format!("unknown event kind \"{name}\""))
                    })
                })
                .transpose()?;
            let limit = if *all { i64::MAX } else { *limit };
            let mut events = catalog.recent_events(kind, limit).await?;
            if let Some(node_id) = node_id {
                events.retain(|event| event.node_id == *node_id);
            }
            if *csv {
                for event in &events {
                    println!(
                        "{},{},{},{},{}",
                        event.node_id,
                        event.event_kind,
                        event.recorded_at.to_rfc3339(),
                        event.success,
                        event.detail.as_deref().unwrap_or("")
                    );
                }
            } else {
                println!(
                    "{:<8} {:<28} {:<26} {:<8} Details",
                    "Node ID", "Event", "Timestamp", "OK"
                );
                for event in &events {
                    println!(
                        "{:<8} {:<28} {:<26} {:<8} {}",
                        event.node_id,
                        event.event_kind,
                        event.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                        event.success,
                        event.detail.as_deref().unwrap_or("")
                    );
                }
            }
            Ok(ExitCode::Success)
        }
        ClusterAction::Matrix { csv } => {
            let results = probe_all(&config, &nodes).await;
            print_matrix_row(&config, &nodes, &results, *csv);
            Ok(ExitCode::Success)
        }
        ClusterAction::Crosscheck { csv } => crosscheck(&config, &nodes, *csv).await,
    }
}

async fn show(
    config: &NodeConfig,
    nodes: &[NodeRecord],
    csv: bool,
    compact: bool,
) -> Result<ExitCode, RepGuardError> {
    if csv {
        for node in nodes {
            let status = if compact {
                "-".to_string()
            } else {
                probe_status(config, node).await
            };
            println!(
                "{},{},{},{},{},{},{},{}",
                node.node_id,
                node.node_name,
                node.node_type,
                status,
                node.upstream_node_id.unwrap_or(0),
                node.location,
                node.priority,
                node.active
            );
        }
        return Ok(ExitCode::Success);
    }

    println!(
        "{:<4} {:<16} {:<8} {:<12} {:<10} {:<10} {:<9} Connection string",
        "ID", "Name", "Role", "Status", "Upstream", "Location", "Priority"
    );
    println!("{}", "-".repeat(100));
    for node in nodes {
        let status = if compact {
            if node.active { "active" } else { "inactive" }.to_string()
        } else {
            probe_status(config, node).await
        };
        let upstream = node
            .upstream_node_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<4} {:<16} {:<8} {:<12} {:<10} {:<10} {:<9} {}",
            node.node_id,
            node.node_name,
            node.node_type.to_string(),
            status,
            upstream,
            node.location,
            node.priority,
            node.conninfo
        );
    }
    Ok(ExitCode::Success)
}

/// Live status column for `cluster show`: registered role plus reachability.
async fn probe_status(config: &NodeConfig, node: &NodeRecord) -> String {
    if !node.active {
        return "! inactive".to_string();
    }
    match EngineClient::connect(&node.conninfo, config.connection_timeout).await {
        Ok(client) => match client.is_in_recovery().await {
            Ok(false) if node.node_type == NodeType::Primary => "* running".to_string(),
            Ok(false) => "! running as primary".to_string(),
            Ok(true) if node.node_type == NodeType::Primary => "! in recovery".to_string(),
            Ok(true) => "running".to_string(),
            Err(_) => "? unknown".to_string(),
        },
        Err(_) => "- unreachable".to_string(),
    }
}

async fn probe_all(config: &NodeConfig, nodes: &[NodeRecord]) -> Vec<bool> {
    let mut results = Vec::with_capacity(nodes.len());
    for node in nodes {
        results
            .push(EngineClient::server_reachable(&node.conninfo, config.connection_timeout).await);
    }
    results
}

fn print_matrix_row(config: &NodeConfig, nodes: &[NodeRecord], results: &[bool], csv: bool) {
    if csv {
        let cells: Vec<String> = results
            .iter()
            .map(|ok| if *ok { "1" } else { "0" }.to_string())
            .collect();
        println!("{},{}", config.node_id, cells.join(","));
    } else {
        let header: Vec<String> = nodes.iter().map(|n| format!("{:>4}", n.node_id)).collect();
        println!("{:>6} |{}", "from", header.join(" "));
        let cells: Vec<String> = results
            .iter()
            .map(|ok| format!("{:>4}", if *ok { "*" } else { "x" }))
            .collect();
        println!("{:>6} |{}", config.node_id, cells.join(" "));
    }
}

/// The full N x N matrix: each row produced by running `cluster matrix --csv`
/// on that node over SSH.
async fn crosscheck(
    config: &NodeConfig,
    nodes: &[NodeRecord],
    csv: bool,
) -> Result<ExitCode, RepGuardError> {
    let mut rows: Vec<(i32, Vec<Option<bool>>)> = Vec::new();

    for node in nodes {
        if node.node_id == config.node_id {
            let results = probe_all(config, nodes).await;
            rows.push((node.node_id, results.into_iter().map(Some).collect()));
            continue;
        }
        let row = match remote_matrix(config, node, nodes.len()).await {
            Some(row) => row,
            None => vec![None; nodes.len()],
        };
        rows.push((node.node_id, row));
    }

    if csv {
        for (from, cells) in &rows {
            let cells: Vec<String> = cells
                .iter()
                .map(|cell| match cell {
                    Some(true) => "1".to_string(),
                    Some(false) => "0".to_string(),
                    None => "-1".to_string(),
                })
                .collect();
            println!("{from},{}", cells.join(","));
        }
    } else {
        let header: Vec<String> = nodes.iter().map(|n| format!("{:>4}", n.node_id)).collect();
        println!("{:>6} |{}", "from", header.join(" "));
        for (from, cells) in &rows {
            let cells: Vec<String> = cells
                .iter()
                .map(|cell| {
                    format!(
                        "{:>4}",
                        match cell {
                            Some(true) => "*",
                            Some(false) => "x",
                            None => "?",
                        }
                    )
                })
                .collect();
            println!("{from:>6} |{}", cells.join(" "));
        }
    }
    Ok(ExitCode::Success)
}

async fn remote_matrix(
    config: &NodeConfig,
    node: &NodeRecord,
    expected_cells: usize,
) -> Option<Vec<Option<bool>>> {
    let host = host_from_conninfo(&node.conninfo)?;
    let ssh = RemoteRunner::new(&host, &config.ssh_options);
    let binary = match &config.repguard_bindir {
        Some(dir) => dir.join("repguard").display().to_string(),
        None => "repguard".to_string(),
    };
    let command = match &node.config_path {
        Some(path) => format!("{binary} -f {path} cluster matrix --csv"),
        None => format!("{binary} cluster matrix --csv"),
    };
    let output = ssh.run(&command).await.ok()?;
    if !output.success() {
        return None;
    }
    let line = output.stdout.lines().next()?;
    let mut cells: Vec<Option<bool>> = line
        .split(',')
        .skip(1) // leading node id
        .map(|cell| match cell.trim() {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        })
        .collect();
    cells.resize(expected_cells, None);
    Some(cells)
}

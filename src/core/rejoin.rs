// src/core/rejoin.rs

//! Rejoins a diverged node to the cluster as a standby of the current
//! primary, rewinding first when the divergence requires it and the operator
//! has opted in.

use crate::config::NodeConfig;
use crate::core::catalog::events::{EventKind, EventNotifier};
use crate::core::catalog::{Catalog, NodeRecord};
use crate::core::errors::RepGuardError;
use crate::core::failover::run_local_command;
use crate::core::failover::timeline::{
    NodePosition, TimelineHistoryEntry, attach_safety, resolve_decision,
};
use crate::core::gateway::EngineClient;
use crate::core::lsn::Lsn;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Operator options for a rejoin run.
#[derive(Debug, Clone, Default)]
pub struct RejoinOptions {
    pub dry_run: bool,
    /// Connection string of any surviving cluster member, used to locate the
    /// current primary and as the rewind source.
    pub seed_conninfo: String,
    /// Rewind the local node when its divergence requires it. The optional
    /// path overrides the rewind executable location.
    pub force_rewind: Option<Option<String>>,
}

/// Local facts needed by the attach decision when the engine is shut down:
/// read from the control data rather than a live connection.
#[derive(Debug, Clone, Copy)]
pub struct ControlFileInfo {
    pub system_identifier: u64,
    pub timeline: u32,
    pub checkpoint_lsn: Lsn,
    pub cleanly_shut_down: bool,
}

impl ControlFileInfo {
    /// Parses the output of the engine's control-data tool.
    pub fn parse(output: &str) -> Result<Self, RepGuardError> {
        let mut system_identifier = None;
        let mut timeline = None;
        let mut checkpoint_lsn = None;
        let mut state = None;

        for line in output.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Database system identifier" => {
                    system_identifier = value.parse::<u64>().ok();
                }
                "Latest checkpoint's TimeLineID" => {
                    timeline = value.parse::<u32>().ok();
                }
                "Latest checkpoint location" => {
                    checkpoint_lsn = value.parse::<Lsn>().ok();
                }
                "Database cluster state" => {
                    state = Some(value.to_string());
                }
                _ => {}
            }
        }

        Ok(ControlFileInfo {
            system_identifier: system_identifier.ok_or_else(|| {
                RepGuardError::Protocol("control data lacks a system identifier".to_string())
            })?,
            timeline: timeline.ok_or_else(|| {
                RepGuardError::Protocol("control data lacks a timeline".to_string())
            })?,
            checkpoint_lsn: checkpoint_lsn.ok_or_else(|| {
                RepGuardError::Protocol("control data lacks a checkpoint location".to_string())
            })?,
            cleanly_shut_down: matches!(
                state.as_deref(),
                Some("shut down") | Some("shut down in recovery")
            ),
        })
    }
}

/// Reads the local node's control data via the engine's control tool.
pub async fn read_control_file(config: &NodeConfig) -> Result<ControlFileInfo, RepGuardError> {
    let output = tokio::process::Command::new("pg_controldata")
        .arg(&config.data_directory)
        .output()
        .await?;
    if !output.status.success() {
        return Err(RepGuardError::Subprocess {
            command: format!("pg_controldata {}", config.data_directory.display()),
            status: output.status.code().unwrap_or(-1),
        });
    }
    ControlFileInfo::parse(&String::from_utf8_lossy(&output.stdout))
}

/// Rejoins this (shut down) node to the cluster under the active primary.
pub async fn run_rejoin(
    config: &NodeConfig,
    options: &RejoinOptions,
) -> Result<(), RepGuardError> {
    let notifier = EventNotifier::new(config.event_notification_command.clone());

    // The local engine must be down; its position comes from the control file.
    if EngineClient::server_reachable(&config.conninfo, config.connection_timeout).await {
        return Err(RepGuardError::Invariant(
            "the local engine is running; shut it down before rejoining".to_string(),
        ));
    }
    let control = read_control_file(config).await?;
    if !control.cleanly_shut_down {
        warn!("local engine did not shut down cleanly; rewind may be required to attach");
    }

    // Find the primary to attach to. The local catalog is stale by
    // definition, so every registered node is probed until one answers as a
    // working primary.
    let (primary_client, primary_record) = locate_primary(config, &options.seed_conninfo).await?;
    let target_identity = primary_client.identity().await?;
    let target_lsn = primary_client
        .wal_positions()
        .await?
        .newest()
        .unwrap_or(Lsn::INVALID);

    let local_position = NodePosition {
        system_identifier: control.system_identifier,
        timeline: control.timeline,
        lsn: control.checkpoint_lsn,
    };
    let target_position = NodePosition {
        system_identifier: target_identity.system_identifier,
        timeline: target_identity.timeline,
        lsn: target_lsn,
    };
    let fork_end = if target_identity.timeline > control.timeline {
        let history = primary_client
            .timeline_history(target_identity.timeline)
            .await?;
        TimelineHistoryEntry::fork_end(&history, control.timeline)
    } else {
        None
    };

    let decision = attach_safety(&local_position, &target_position, fork_end);
    let version = primary_client.server_version_num().await?;
    let needs_rewind = resolve_decision(decision, options.force_rewind.is_some(), version)?;

    if options.dry_run {
        println!(
            "node rejoin dry run: attach to node {} is possible{}",
            primary_record.node_id,
            if needs_rewind { " after a rewind" } else { "" }
        );
        return Ok(());
    }

    if needs_rewind {
        run_rewind(config, options).await?;
    }

    let follow_command = config
        .follow_command
        .clone()
        .ok_or_else(|| RepGuardError::Config("no follow command configured".to_string()))?;
    run_local_command(&follow_command).await?;

    // Wait for the engine to come back and stream from the new upstream.
    wait_until_attached(config).await?;

    let catalog = Catalog::new(&primary_client);
    catalog
        .set_upstream(config.node_id, Some(primary_record.node_id))
        .await?;
    notifier
        .record(
            Some(&primary_client),
            config.node_id,
            EventKind::NodeRejoin,
            true,
            &format!(
                "node {} rejoined the cluster following node {}{}",
                config.node_id,
                primary_record.node_id,
                if needs_rewind { " (after rewind)" } else { "" }
            ),
        )
        .await;
    info!(
        "node {} rejoined; now following node {}",
        config.node_id, primary_record.node_id
    );
    Ok(())
}

/// Probes every registered node until one answers as a working primary.
/// The search starts from any node the stale local catalog still knows.
async fn locate_primary(
    config: &NodeConfig,
    seed_conninfo: &str,
) -> Result<(EngineClient, NodeRecord), RepGuardError> {
    // Without a live local engine the only seed is the conninfo the operator
    // supplied, pointing at any surviving node.
    let seed = EngineClient::connect(seed_conninfo, config.connection_timeout).await?;
    let catalog = Catalog::new(&seed);
    let nodes = catalog.get_all_nodes().await?;

    for node in nodes.iter().filter(|n| n.active) {
        let Ok(client) =
            EngineClient::connect(&node.conninfo, config.connection_timeout).await
        else {
            continue;
        };
        if matches!(client.is_in_recovery().await, Ok(false)) {
            return Ok((client, node.clone()));
        }
    }
    Err(RepGuardError::Catalog(
        "no reachable node answers as a primary; cannot rejoin".to_string(),
    ))
}

async fn run_rewind(config: &NodeConfig, options: &RejoinOptions) -> Result<(), RepGuardError> {
    // The rewind rewrites the data directory from the source, clobbering
    // local configuration; keep a copy to restore from.
    archive_config_files(config)?;
    let rewind_binary = options
        .force_rewind
        .clone()
        .flatten()
        .unwrap_or_else(|| "pg_rewind".to_string());
    let source = &options.seed_conninfo;
    let command = format!(
        "{rewind_binary} --target-pgdata={} --source-server='{}'",
        config.data_directory.display(),
        source
    );
    info!("rewinding the local node to the fork point");
    run_local_command(&command).await
}

/// Copies the configuration files in the data directory into a sibling
/// archive directory before a rewind touches them.
fn archive_config_files(config: &NodeConfig) -> Result<(), RepGuardError> {
    // A sibling of the data directory: the rewind must not touch the copies.
    let archive_dir = config
        .data_directory
        .parent()
        .unwrap_or_else(|| std::path::Path::new("/tmp"))
        .join("repguard-config-archive");
    std::fs::create_dir_all(&archive_dir)?;
    for name in [
        "postgresql.conf",
        "postgresql.auto.conf",
        "pg_hba.conf",
        "pg_ident.conf",
    ] {
        let source = config.data_directory.join(name);
        if source.exists() {
            std::fs::copy(&source, archive_dir.join(name))?;
        }
    }
    info!(
        "configuration files archived to \"{}\"",
        archive_dir.display()
    );
    Ok(())
}

/// Polls the local engine until it is back up and in recovery, bounded by
/// `node_rejoin_timeout`.
async fn wait_until_attached(config: &NodeConfig) -> Result<(), RepGuardError> {
    let deadline = tokio::time::Instant::now() + config.node_rejoin_timeout;
    loop {
        if let Ok(client) =
            EngineClient::connect(&config.conninfo, config.connection_timeout).await
            && matches!(client.is_in_recovery().await, Ok(true))
        {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RepGuardError::Connection(format!(
                "local engine did not come back as a standby within {}s",
                config.node_rejoin_timeout.as_secs()
            )));
        }
        sleep(Duration::from_secs(1)).await;
    }
}

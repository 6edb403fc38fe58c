// src/cli/standby.rs

//! `standby register/clone/promote/follow/switchover`.

use crate::cli::{Cli, Diagnostics};
use crate::cli::primary::record_from_config;
use crate::config::NodeConfig;
use crate::core::catalog::events::{EventKind, EventNotifier};
use crate::core::catalog::{Catalog, NodeType, RecordStatus};
use crate::core::errors::{ExitCode, RepGuardError};
use crate::core::failover::{
    FailoverContext, FollowOutcome, follow_new_primary, notify_followers, run_local_command,
    verify_out_of_recovery,
};
use crate::core::gateway::EngineClient;
use crate::core::shared::SharedState;
use crate::core::switchover::{SwitchoverOptions, run_switchover};
use clap::Subcommand;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Subcommand, Debug)]
pub enum StandbyAction {
    /// Register the local node as a standby of the current primary
    Register {
        /// Upstream node this standby streams from (defaults to the primary)
        #[arg(long)]
        upstream_node_id: Option<i32>,
        #[arg(short = 'F', long)]
        force: bool,
        /// Wait for the record to replicate back to this node
        #[arg(long, overrides_with = "no_wait")]
        wait: bool,
        #[arg(long)]
        no_wait: bool,
    },
    /// Clone a standby from the primary with the external base-backup tool
    Clone {
        #[arg(long)]
        dry_run: bool,
        /// Also copy configuration files living outside the data directory
        #[arg(long)]
        copy_external_config_files: bool,
    },
    /// Promote the local standby to primary (operator initiated)
    Promote {
        #[arg(long)]
        dry_run: bool,
        /// Tell registered siblings to follow this node after promotion
        #[arg(long)]
        siblings_follow: bool,
        /// Promote even when sibling standbys are ahead of this node
        #[arg(long)]
        always_promote: bool,
    },
    /// Re-parent the local standby under the current primary
    Follow {
        /// Follow this node instead of the discovered primary
        #[arg(long)]
        upstream_node_id: Option<i32>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Controlled role swap with the current primary
    Switchover {
        #[arg(long)]
        dry_run: bool,
        #[arg(short = 'F', long)]
        force: bool,
        #[arg(long)]
        siblings_follow: bool,
        /// Rewind the old primary if its divergence requires it
        #[arg(long)]
        force_rewind: bool,
        /// Do not pause supervisors for the duration
        #[arg(long = "repguardd-no-pause")]
        repguardd_no_pause: bool,
        /// Maximum candidate lag in bytes before --force is required
        #[arg(long)]
        max_lag_bytes: Option<u64>,
    },
}

pub async fn run_standby(cli: &Cli, action: &StandbyAction) -> Result<ExitCode, RepGuardError> {
    let config = cli.require_config()?;
    let notifier = EventNotifier::new(config.event_notification_command.clone());

    match action {
        StandbyAction::Register {
            upstream_node_id,
            force,
            wait,
            no_wait: _,
        } => register(&config, &notifier, *upstream_node_id, *force, *wait).await,
        StandbyAction::Clone {
            dry_run,
            copy_external_config_files,
        } => clone(cli, &config, &notifier, *dry_run, *copy_external_config_files).await,
        StandbyAction::Promote {
            dry_run,
            siblings_follow,
            always_promote,
        } => promote(&config, &notifier, *dry_run, *siblings_follow, *always_promote).await,
        StandbyAction::Follow {
            upstream_node_id,
            dry_run,
        } => follow(&config, &notifier, *upstream_node_id, *dry_run).await,
        StandbyAction::Switchover {
            dry_run,
            force,
            siblings_follow,
            force_rewind,
            repguardd_no_pause,
            max_lag_bytes,
        } => {
            let options = SwitchoverOptions {
                force: *force,
                dry_run: *dry_run,
                siblings_follow: *siblings_follow,
                force_rewind: *force_rewind,
                repguardd_no_pause: *repguardd_no_pause,
                max_lag_bytes: *max_lag_bytes,
            };
            run_switchover(&config, &options).await?;
            Ok(ExitCode::Success)
        }
    }
}

async fn register(
    config: &NodeConfig,
    notifier: &EventNotifier,
    upstream_node_id: Option<i32>,
    force: bool,
    wait: bool,
) -> Result<ExitCode, RepGuardError> {
    let mut diagnostics = Diagnostics::default();
    if config.priority == 0 {
        diagnostics.warning("priority is 0; this node will never be a promotion candidate");
    }
    let local = EngineClient::connect(&config.conninfo, config.connection_timeout).await?;
    if !local.is_in_recovery().await? {
        diagnostics.error("this node is not in recovery; a standby must be");
    }

    // Registration writes through the primary; the record replicates back.
    let catalog = Catalog::new(&local);
    let primary_record = catalog
        .get_primary_node()
        .await
        .into_result(|| RepGuardError::Catalog("no active primary registered".to_string()))?;
    let primary = EngineClient::connect(&primary_record.conninfo, config.connection_timeout).await?;
    let primary_catalog = Catalog::new(&primary);

    let upstream_id = upstream_node_id.unwrap_or(primary_record.node_id);
    if let RecordStatus::NotFound = primary_catalog.get_node(upstream_id).await {
        diagnostics.error(format!("upstream node {upstream_id} is not registered"));
    }
    match primary_catalog.get_node(config.node_id).await {
        RecordStatus::Found(_) if !force => {
            diagnostics.error("a record for this node id exists; use --force to overwrite");
        }
        RecordStatus::Error(e) => return Err(e),
        _ => {}
    }

    if diagnostics.has_errors() {
        diagnostics.emit();
        return Ok(ExitCode::BadConfig);
    }

    let record = record_from_config(config, NodeType::Standby, Some(upstream_id));
    primary_catalog.upsert_node(&record).await?;

    if config.use_replication_slots {
        let slot = config.slot_name();
        if !primary.replication_slot_exists(&slot).await? {
            primary.create_replication_slot(&slot).await?;
        }
    }

    notifier
        .record(
            Some(&primary),
            config.node_id,
            EventKind::StandbyRegister,
            true,
            &format!(
                "standby node {} registered with upstream node {}",
                config.node_id, upstream_id
            ),
        )
        .await;

    // The record was written on the primary; replication brings it back here.
    if wait {
        let deadline = tokio::time::Instant::now() + config.standby_reconnect_timeout;
        loop {
            if let RecordStatus::Found(_) = catalog.get_node(config.node_id).await {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RepGuardError::Catalog(format!(
                    "node record did not replicate back within {}s",
                    config.standby_reconnect_timeout.as_secs()
                )));
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }

    info!("standby node {} registered", config.node_id);
    diagnostics.emit();
    Ok(ExitCode::Success)
}

/// Clones the primary's data directory with the external base-backup tool
/// and configures the result as a standby.
async fn clone(
    cli: &Cli,
    config: &NodeConfig,
    notifier: &EventNotifier,
    dry_run: bool,
    copy_external_config_files: bool,
) -> Result<ExitCode, RepGuardError> {
    let source_conninfo = cli
        .conninfo_override()
        .ok_or_else(|| {
            RepGuardError::Config("standby clone needs the source conninfo via -d/-h".to_string())
        })?;
    let source = EngineClient::connect(&source_conninfo, config.connection_timeout).await?;
    if source.is_in_recovery().await? {
        warn!("cloning from a standby; cascading replication will apply");
    }
    let version = source.server_version_num().await?;

    if dry_run {
        println!(
            "standby clone dry run: source reachable (engine version {version}), \
             target directory \"{}\"",
            config.data_directory.display()
        );
        return Ok(ExitCode::Success);
    }

    if config.use_replication_slots {
        let slot = config.slot_name();
        if !source.replication_slot_exists(&slot).await? {
            source.create_replication_slot(&slot).await?;
        }
    }

    let user = config
        .replication_user
        .clone()
        .or_else(|| cli.username.clone())
        .unwrap_or_else(|| "replicator".to_string());
    let mut command = format!(
        "pg_basebackup --pgdata={} --dbname='{}' --username={} --wal-method=stream \
         --checkpoint=fast --progress",
        config.data_directory.display(),
        source_conninfo,
        user
    );
    if config.use_replication_slots {
        command.push_str(&format!(" --slot={}", config.slot_name()));
    }
    run_local_command(&command).await?;

    // Engines from version 12 on expect a marker file instead of a recovery
    // configuration.
    if version >= 120000 {
        let marker = config.data_directory.join("standby.signal");
        std::fs::write(&marker, b"").map_err(|e| {
            RepGuardError::Internal(format!("cannot write \"{}\": {e}", marker.display()))
        })?;
    }
    let auto_conf = config.data_directory.join("postgresql.auto.conf");
    let mut primary_conninfo = format!(
        "\nprimary_conninfo = '{} application_name={}'\n",
        source_conninfo, config.node_name
    );
    if config.use_replication_slots {
        primary_conninfo.push_str(&format!("primary_slot_name = '{}'\n", config.slot_name()));
    }
    if let Some(restore_command) = &config.restore_command {
        primary_conninfo.push_str(&format!("restore_command = '{restore_command}'\n"));
    }
    append_to_file(&auto_conf, &primary_conninfo)?;

    // The base backup only carries the data directory; configuration kept
    // elsewhere (a Debian-style /etc layout) has to be fetched separately.
    if copy_external_config_files {
        copy_external_configs(config, &source, &source_conninfo).await?;
    }

    notifier
        .record(
            Some(&source),
            config.node_id,
            EventKind::StandbyClone,
            true,
            &format!(
                "standby cloned into \"{}\"",
                config.data_directory.display()
            ),
        )
        .await;
    info!("clone complete; start the engine and run \"repguard standby register\"");
    Ok(ExitCode::Success)
}

/// Fetches the source's configuration files that live outside its data
/// directory to the same paths locally.
async fn copy_external_configs(
    config: &NodeConfig,
    source: &EngineClient,
    source_conninfo: &str,
) -> Result<(), RepGuardError> {
    let host = crate::core::ssh::host_from_conninfo(source_conninfo).ok_or_else(|| {
        RepGuardError::Config(
            "--copy-external-config-files needs a host in the source conninfo".to_string(),
        )
    })?;
    let source_data_dir: String = source
        .query_one(
            "SELECT pg_catalog.current_setting('data_directory')",
            &[],
        )
        .await?
        .get(0);
    let rows = source
        .query(
            "SELECT setting FROM pg_catalog.pg_settings \
             WHERE name IN ('config_file', 'hba_file', 'ident_file')",
            &[],
        )
        .await?;
    for row in rows {
        let path: String = row.get(0);
        // Files inside the source's data directory arrived with the backup.
        if std::path::Path::new(&path).starts_with(&source_data_dir) {
            continue;
        }
        crate::core::ssh::rsync_copy(&config.rsync_options, &format!("{host}:{path}"), &path)
            .await?;
    }
    Ok(())
}

fn append_to_file(path: &std::path::Path, content: &str) -> Result<(), RepGuardError> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RepGuardError::Internal(format!("cannot open \"{}\": {e}", path.display())))?;
    file.write_all(content.as_bytes())
        .map_err(|e| RepGuardError::Internal(format!("cannot write \"{}\": {e}", path.display())))?;
    Ok(())
}

/// Operator-initiated promotion of the local standby.
async fn promote(
    config: &NodeConfig,
    notifier: &EventNotifier,
    dry_run: bool,
    siblings_follow: bool,
    always_promote: bool,
) -> Result<ExitCode, RepGuardError> {
    let local = EngineClient::connect(&config.conninfo, config.connection_timeout).await?;
    if !local.is_in_recovery().await? {
        return Err(RepGuardError::Invariant(
            "this node is already a primary".to_string(),
        ));
    }
    let catalog = Catalog::new(&local);
    let record = catalog.get_node(config.node_id).await.into_result(|| {
        RepGuardError::Catalog(format!("node {} is not registered", config.node_id))
    })?;

    // Promoting a lagging node silently abandons whatever the others have.
    if let Some(upstream_id) = record.upstream_node_id {
        let siblings = catalog
            .get_active_sibling_nodes(record.node_id, upstream_id)
            .await?;
        let own_lsn = local.last_receive_lsn().await?;
        for sibling in siblings.iter().filter(|s| s.node_type == NodeType::Standby) {
            let Ok(client) =
                EngineClient::connect(&sibling.conninfo, config.connection_timeout).await
            else {
                continue;
            };
            if let Ok(lsn) = client.last_receive_lsn().await {
                if lsn > own_lsn && !always_promote {
                    return Err(RepGuardError::Invariant(format!(
                        "sibling node {} is ahead of this node ({} > {}); promote it instead, \
                         or use --always-promote",
                        sibling.node_id, lsn, own_lsn
                    )));
                }
            }
        }
    }

    if dry_run {
        println!("standby promote dry run: node {} can be promoted", record.node_id);
        return Ok(ExitCode::Success);
    }

    let command = config
        .effective_promote_command()
        .ok_or_else(|| RepGuardError::Config("no promote command configured".to_string()))?;
    run_local_command(command).await?;
    let local = EngineClient::connect(&config.conninfo, config.connection_timeout).await?;
    verify_out_of_recovery(&local).await?;
    let catalog = Catalog::new(&local);
    catalog.promote_node(record.node_id).await?;
    notifier
        .record(
            Some(&local),
            record.node_id,
            EventKind::StandbyPromote,
            true,
            &format!("node {} promoted by operator", record.node_id),
        )
        .await;

    if siblings_follow {
        if let Some(upstream_id) = record.upstream_node_id {
            let siblings = catalog
                .get_active_sibling_nodes(record.node_id, upstream_id)
                .await?;
            let snapshot: Vec<_> = siblings
                .iter()
                .map(crate::core::election::SiblingInfo::from_record)
                .collect();
            notify_followers(&snapshot, record.node_id, config.connection_timeout).await;
        }
    }

    info!("node {} promoted", record.node_id);
    Ok(ExitCode::Success)
}

/// Operator-initiated follow of the current (or a named) primary.
async fn follow(
    config: &NodeConfig,
    notifier: &EventNotifier,
    upstream_node_id: Option<i32>,
    dry_run: bool,
) -> Result<ExitCode, RepGuardError> {
    let local = EngineClient::connect(&config.conninfo, config.connection_timeout).await?;
    let catalog = Catalog::new(&local);
    let record = catalog.get_node(config.node_id).await.into_result(|| {
        RepGuardError::Catalog(format!("node {} is not registered", config.node_id))
    })?;

    let target = match upstream_node_id {
        Some(id) => catalog.get_node(id).await.into_result(|| {
            RepGuardError::Catalog(format!("node {id} is not registered"))
        })?,
        None => catalog
            .get_primary_node()
            .await
            .into_result(|| RepGuardError::Catalog("no active primary registered".to_string()))?,
    };

    if dry_run {
        println!(
            "standby follow dry run: would re-parent node {} under node {}",
            record.node_id, target.node_id
        );
        return Ok(ExitCode::Success);
    }

    let shared = Arc::new(SharedState::new());
    shared.set_local_node_id(record.node_id);
    let ctx = FailoverContext {
        config,
        shared,
        notifier,
        local_record: &record,
        former_upstream: None,
    };
    match follow_new_primary(&ctx, &target, EventKind::StandbyFollow).await? {
        FollowOutcome::Followed => Ok(ExitCode::Success),
        FollowOutcome::Failed(reason) => {
            eprintln!("{reason}");
            Ok(ExitCode::FailoverFail)
        }
    }
}

// src/core/switchover.rs

//! Operator-initiated controlled role swap between the current primary and
//! the standby this command runs on.
//!
//! The orchestration is synchronous and deliberately conservative: automatic
//! failover is paused fleet-wide first, the primary is shut down cleanly and
//! its final position verified against the candidate before anything is
//! promoted, and every abort path unpauses the fleet again.

use crate::config::NodeConfig;
use crate::core::catalog::events::{EventKind, EventNotifier};
use crate::core::catalog::{Catalog, NodeRecord, NodeType};
use crate::core::errors::RepGuardError;
use crate::core::failover::{run_local_command, verify_out_of_recovery};
use crate::core::gateway::EngineClient;
use crate::core::lsn::Lsn;
use crate::core::peer::PeerClient;
use crate::core::ssh::{RemoteRunner, host_from_conninfo};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Default ceiling on how far the candidate may trail the primary before
/// `--force` is required.
pub const DEFAULT_MAX_LAG_BYTES: u64 = 16 * 1024 * 1024;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Operator-selected behaviour for one switchover run.
#[derive(Debug, Clone, Default)]
pub struct SwitchoverOptions {
    pub force: bool,
    pub dry_run: bool,
    pub siblings_follow: bool,
    pub force_rewind: bool,
    /// Skip the fleet-wide supervisor pause.
    pub repguardd_no_pause: bool,
    pub max_lag_bytes: Option<u64>,
}

/// Runs the switchover. On success the local node is the new primary.
pub async fn run_switchover(
    config: &NodeConfig,
    options: &SwitchoverOptions,
) -> Result<(), RepGuardError> {
    let notifier = EventNotifier::new(config.event_notification_command.clone());

    // Step 1: discover the topology.
    let local = EngineClient::connect(&config.conninfo, config.connection_timeout).await?;
    let catalog = Catalog::new(&local);
    let local_record = catalog.get_node(config.node_id).await.into_result(|| {
        RepGuardError::Catalog(format!("node {} is not registered", config.node_id))
    })?;
    if local_record.node_type != NodeType::Standby {
        return Err(RepGuardError::Invariant(
            "switchover must run on the standby being promoted".to_string(),
        ));
    }
    let primary_record = catalog.get_primary_node().await.into_result(|| {
        RepGuardError::Catalog("no active primary registered".to_string())
    })?;
    let siblings = catalog
        .get_active_sibling_nodes(local_record.node_id, primary_record.node_id)
        .await?;

    let primary_host = host_from_conninfo(&primary_record.conninfo).ok_or_else(|| {
        RepGuardError::Config(format!(
            "cannot derive an SSH host from the primary's conninfo \"{}\"",
            primary_record.conninfo
        ))
    })?;
    let primary_ssh = RemoteRunner::new(&primary_host, &config.ssh_options);

    // Step 2: verify the candidate is in sync with the primary.
    let primary = EngineClient::connect(&primary_record.conninfo, config.connection_timeout).await?;
    let primary_lsn = primary
        .wal_positions()
        .await?
        .current
        .ok_or_else(|| RepGuardError::Protocol("primary reports no current position".to_string()))?;
    let local_replay = local
        .wal_positions()
        .await?
        .replay
        .unwrap_or(Lsn::INVALID);
    let lag = primary_lsn.saturating_diff(local_replay);
    let max_lag = options.max_lag_bytes.unwrap_or(DEFAULT_MAX_LAG_BYTES);
    if lag > max_lag && !options.force {
        return Err(RepGuardError::Invariant(format!(
            "candidate trails the primary by {lag} bytes (limit {max_lag}); \
             use --force to switch over anyway"
        )));
    }

    if options.dry_run {
        return dry_run_report(config, options, &primary_ssh, &primary_record, &siblings, lag)
            .await;
    }

    notifier
        .record(
            Some(&primary),
            local_record.node_id,
            EventKind::StandbySwitchover,
            true,
            &format!(
                "switchover started: node {} replacing primary node {}",
                local_record.node_id, primary_record.node_id
            ),
        )
        .await;

    // Step 3: pause the supervisors so nobody treats the controlled shutdown
    // as a failure.
    let mut paused_peers = Vec::new();
    if !options.repguardd_no_pause {
        let mut all_nodes = siblings.clone();
        all_nodes.push(primary_record.clone());
        all_nodes.push(local_record.clone());
        for node in &all_nodes {
            match PeerClient::connect(&node.peer_addr, config.connection_timeout).await {
                Ok(mut peer) => {
                    peer.set_paused(true).await?;
                    paused_peers.push(node.peer_addr.clone());
                }
                Err(e) => {
                    if options.force {
                        warn!(
                            "supervisor on node {} unreachable ({}); continuing under --force",
                            node.node_id, e
                        );
                    } else {
                        unpause(&paused_peers, config).await;
                        return Err(RepGuardError::Peer(format!(
                            "cannot pause the supervisor on node {}: {e}; \
                             use --force to proceed without it",
                            node.node_id
                        )));
                    }
                }
            }
        }
    }

    // Step 4: shut the primary down cleanly and wait for its control file to
    // confirm it.
    let result = shutdown_and_promote(
        config,
        options,
        &notifier,
        &local,
        &local_record,
        &primary_record,
        &primary_ssh,
        &siblings,
    )
    .await;

    // Step 9: unpause, success or not.
    unpause(&paused_peers, config).await;

    result
}

#[allow(clippy::too_many_arguments)]
async fn shutdown_and_promote(
    config: &NodeConfig,
    options: &SwitchoverOptions,
    notifier: &EventNotifier,
    local: &EngineClient,
    local_record: &NodeRecord,
    primary_record: &NodeRecord,
    primary_ssh: &RemoteRunner,
    siblings: &[NodeRecord],
) -> Result<(), RepGuardError> {
    let remote_repguard = remote_repguard_command(config, primary_record);

    info!(
        "instructing primary node {} to shut down cleanly",
        primary_record.node_id
    );
    primary_ssh
        .run_checked(&format!("{remote_repguard} node service --action=stop --checkpoint"))
        .await?;

    let final_lsn = wait_for_clean_shutdown(config, primary_ssh, &remote_repguard).await?;

    // Step 5: nothing the primary wrote may be missing from the candidate.
    let local_replay = local.wal_positions().await?.replay.unwrap_or(Lsn::INVALID);
    if final_lsn > local_replay {
        // Try to bring the old primary back up before aborting.
        warn!(
            "primary's final position {} is ahead of the candidate's replayed {}; aborting",
            final_lsn, local_replay
        );
        let _ = primary_ssh
            .run(&format!("{remote_repguard} node service --action=start"))
            .await;
        return Err(RepGuardError::Invariant(format!(
            "primary shut down at {final_lsn} but the candidate has only replayed \
             {local_replay}; switchover aborted and the primary restarted"
        )));
    }

    // Step 6: promote the local node.
    let promote_command = config
        .effective_promote_command()
        .ok_or_else(|| RepGuardError::Config("no promote command configured".to_string()))?;
    run_local_command(promote_command).await?;
    let local = EngineClient::connect(&config.conninfo, config.connection_timeout).await?;
    verify_out_of_recovery(&local).await?;
    let catalog = Catalog::new(&local);
    catalog.promote_node(local_record.node_id).await?;
    notifier
        .record(
            Some(&local),
            local_record.node_id,
            EventKind::StandbyPromote,
            true,
            &format!("node {} promoted by switchover", local_record.node_id),
        )
        .await;

    // Step 7: re-parent each sibling over SSH.
    if options.siblings_follow {
        for sibling in siblings {
            if sibling.node_type == NodeType::Witness {
                continue;
            }
            if let Err(e) = follow_remote(config, sibling).await {
                warn!(
                    "sibling node {} could not be re-parented: {}; it will converge \
                     through its own supervisor",
                    sibling.node_id, e
                );
            }
        }
    }

    // Step 8: rejoin the old primary as a standby of the new one.
    let rejoin_flags = if options.force_rewind { " --force-rewind" } else { "" };
    let rejoin = primary_ssh
        .run(&format!("{remote_repguard} node rejoin{rejoin_flags}"))
        .await?;
    if !rejoin.success() {
        warn!(
            "old primary node {} was not rejoined (status {}): {}",
            primary_record.node_id,
            rejoin.status,
            rejoin.stderr.trim()
        );
        warn!(
            "rejoin it manually with \"repguard node rejoin --force-rewind\" on {} \
             once its divergence is understood",
            primary_ssh.host()
        );
    }

    notifier
        .record(
            Some(&local),
            local_record.node_id,
            EventKind::StandbySwitchover,
            true,
            &format!(
                "switchover complete: node {} is primary, node {} demoted",
                local_record.node_id, primary_record.node_id
            ),
        )
        .await;
    info!("switchover complete; node {} is now the primary", local_record.node_id);
    Ok(())
}

/// Polls the old primary's control data until it reports a clean shutdown,
/// returning its final checkpoint position.
async fn wait_for_clean_shutdown(
    config: &NodeConfig,
    primary_ssh: &RemoteRunner,
    remote_repguard: &str,
) -> Result<Lsn, RepGuardError> {
    let deadline = tokio::time::Instant::now() + config.shutdown_check_timeout;
    loop {
        let output = primary_ssh
            .run(&format!("{remote_repguard} node status --is-shutdown-cleanly"))
            .await?;
        if output.success() {
            if let Some(lsn) = parse_checkpoint_lsn(&output.stdout) {
                return Ok(lsn);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RepGuardError::Subprocess {
                command: "remote clean-shutdown check".to_string(),
                status: output.status,
            });
        }
        sleep(SHUTDOWN_POLL_INTERVAL).await;
    }
}

/// Parses `checkpoint_lsn: X/Y` from the remote status report.
pub fn parse_checkpoint_lsn(report: &str) -> Option<Lsn> {
    report.lines().find_map(|line| {
        line.trim()
            .strip_prefix("checkpoint_lsn:")
            .and_then(|rest| rest.trim().parse().ok())
    })
}

/// The repguard invocation prefix for a remote node, honouring its recorded
/// configuration file and any configured binary directory.
fn remote_repguard_command(config: &NodeConfig, node: &NodeRecord) -> String {
    let binary = match &config.repguard_bindir {
        Some(dir) => dir.join("repguard").display().to_string(),
        None => "repguard".to_string(),
    };
    match &node.config_path {
        Some(path) => format!("{binary} -f {path}"),
        None => binary,
    }
}

async fn follow_remote(config: &NodeConfig, sibling: &NodeRecord) -> Result<(), RepGuardError> {
    let host = host_from_conninfo(&sibling.conninfo).ok_or_else(|| {
        RepGuardError::Config(format!(
            "cannot derive an SSH host for node {}",
            sibling.node_id
        ))
    })?;
    let ssh = RemoteRunner::new(&host, &config.ssh_options);
    let command = remote_repguard_command(config, sibling);
    ssh.run_checked(&format!("{command} standby follow")).await?;
    Ok(())
}

async fn unpause(paused_peers: &[String], config: &NodeConfig) {
    for addr in paused_peers {
        match PeerClient::connect(addr, config.connection_timeout).await {
            Ok(mut peer) => {
                if let Err(e) = peer.set_paused(false).await {
                    warn!("could not unpause supervisor at {}: {}", addr, e);
                }
            }
            Err(e) => warn!("could not reach supervisor at {} to unpause: {}", addr, e),
        }
    }
}

/// `--dry-run`: every mutating step becomes a preflight check reporting the
/// outcome it would produce.
async fn dry_run_report(
    config: &NodeConfig,
    options: &SwitchoverOptions,
    primary_ssh: &RemoteRunner,
    primary_record: &NodeRecord,
    siblings: &[NodeRecord],
    lag: u64,
) -> Result<(), RepGuardError> {
    println!("switchover dry run");
    println!(
        "  candidate lag behind primary: {} bytes (limit {})",
        lag,
        options.max_lag_bytes.unwrap_or(DEFAULT_MAX_LAG_BYTES)
    );

    if options.repguardd_no_pause {
        println!("  supervisor pause: skipped (--repguardd-no-pause)");
    } else {
        let mut unreachable = 0;
        for node in siblings.iter().chain([primary_record]) {
            if PeerClient::connect(&node.peer_addr, config.connection_timeout)
                .await
                .is_err()
            {
                println!("  supervisor on node {} is unreachable", node.node_id);
                unreachable += 1;
            }
        }
        if unreachable == 0 {
            println!("  supervisor pause: all supervisors reachable");
        } else if !options.force {
            println!("  switchover would abort: {unreachable} supervisor(s) unreachable");
        }
    }

    if primary_ssh.check_connection().await {
        println!("  ssh to primary host {}: ok", primary_ssh.host());
    } else {
        println!(
            "  switchover would abort: no ssh access to primary host {}",
            primary_ssh.host()
        );
    }

    println!(
        "  would promote this node ({}) and re-parent {} sibling(s)",
        config.node_name,
        siblings.len()
    );
    Ok(())
}

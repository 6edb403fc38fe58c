// src/core/failover/mod.rs

//! Executes the local role change after an election: promoting this node, or
//! re-parenting it under a new primary.

pub mod timeline;

use crate::config::NodeConfig;
use crate::core::catalog::events::{EventKind, EventNotifier};
use crate::core::catalog::{Catalog, NodeRecord};
use crate::core::election::SiblingInfo;
use crate::core::errors::RepGuardError;
use crate::core::gateway::EngineClient;
use crate::core::peer::PeerClient;
use crate::core::shared::SharedState;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use timeline::{AttachDecision, NodePosition, TimelineHistoryEntry, attach_safety};
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{info, warn};

/// How long a freshly promoted node is polled until it reports itself out of
/// recovery.
const PROMOTION_VERIFY_TIMEOUT: Duration = Duration::from_secs(60);
const PROMOTION_VERIFY_INTERVAL: Duration = Duration::from_secs(1);

/// Result of a promotion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// This node is now the primary.
    Promoted,
    /// The original primary came back before the role change took effect;
    /// siblings were told to resume following it and the local role is
    /// unchanged.
    PrimaryReappeared,
}

/// Result of a follow attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowOutcome {
    Followed,
    /// The follow action could not be completed; the monitor stays degraded
    /// until an operator intervenes.
    Failed(String),
}

/// Shared dependencies of the promote and follow actions.
pub struct FailoverContext<'a> {
    pub config: &'a NodeConfig,
    pub shared: Arc<SharedState>,
    pub notifier: &'a EventNotifier,
    pub local_record: &'a NodeRecord,
    /// The lost upstream, for the reappeared-primary check.
    pub former_upstream: Option<&'a NodeRecord>,
}

/// Runs a configured shell command, capturing output.
pub async fn run_local_command(command: &str) -> Result<(), RepGuardError> {
    info!("executing: {}", command);
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .output()
        .await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("command failed: {}", stderr.trim());
        return Err(RepGuardError::Subprocess {
            command: command.to_string(),
            status: output.status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

/// Checks whether the former upstream has come back as a working primary.
async fn former_primary_reappeared(
    ctx: &FailoverContext<'_>,
) -> Option<()> {
    let former = ctx.former_upstream?;
    let client = EngineClient::connect(&former.conninfo, ctx.config.connection_timeout)
        .await
        .ok()?;
    match client.is_in_recovery().await {
        Ok(false) => Some(()),
        _ => None,
    }
}

/// Promotes the local node to primary.
///
/// Aborts with [`PromoteOutcome::PrimaryReappeared`] when the lost upstream
/// answers as a primary again, either before the promotion command runs or
/// immediately after it returns; in both cases the siblings are redirected
/// back to the original primary.
pub async fn promote_self(
    ctx: &FailoverContext<'_>,
    snapshot: &[SiblingInfo],
) -> Result<PromoteOutcome, RepGuardError> {
    if !ctx.config.promote_delay.is_zero() {
        sleep(ctx.config.promote_delay).await;
    }

    if former_primary_reappeared(ctx).await.is_some() {
        let former = ctx.former_upstream.expect("former upstream checked");
        info!(
            "primary node {} reappeared before promotion; aborting and resuming follow",
            former.node_id
        );
        notify_followers(snapshot, former.node_id, ctx.config.connection_timeout).await;
        ctx.shared.reset_voting_status();
        return Ok(PromoteOutcome::PrimaryReappeared);
    }

    let command = ctx
        .config
        .effective_promote_command()
        .ok_or_else(|| RepGuardError::Config("no promote command configured".to_string()))?;
    run_local_command(command).await?;

    // Re-open the local connection and verify the engine actually left
    // recovery; the promote command returning success is not proof.
    let local = reconnect_local(ctx.config).await?;
    if former_primary_reappeared(ctx).await.is_some() {
        let former = ctx.former_upstream.expect("former upstream checked");
        warn!(
            "primary node {} reappeared during promotion; redirecting siblings back to it",
            former.node_id
        );
        notify_followers(snapshot, former.node_id, ctx.config.connection_timeout).await;
        ctx.shared.reset_voting_status();
        return Ok(PromoteOutcome::PrimaryReappeared);
    }
    verify_out_of_recovery(&local).await?;

    // Refresh the catalog through the now-writable local node.
    let catalog = Catalog::new(&local);
    catalog.promote_node(ctx.local_record.node_id).await?;

    ctx.notifier
        .record(
            Some(&local),
            ctx.local_record.node_id,
            EventKind::RepguardFailoverPromote,
            true,
            &format!("node {} promoted to primary", ctx.local_record.node_id),
        )
        .await;

    ctx.shared.reset_voting_status();
    info!("promotion complete; node {} is primary", ctx.local_record.node_id);
    Ok(PromoteOutcome::Promoted)
}

/// Best-effort announcement of the new primary to every sibling in the last
/// snapshot. A sibling that cannot be reached converges later through its
/// own monitor loop.
pub async fn notify_followers(
    snapshot: &[SiblingInfo],
    new_primary_id: i32,
    connection_timeout: Duration,
) {
    for sibling in snapshot {
        if sibling.node_id == new_primary_id {
            continue;
        }
        match PeerClient::connect(&sibling.peer_addr, connection_timeout).await {
            Ok(mut peer) => {
                if let Err(e) = peer.notify_follow_primary(new_primary_id).await {
                    warn!("could not notify node {}: {}", sibling.node_id, e);
                }
            }
            Err(e) => {
                warn!(
                    "sibling node {} unreachable for follow notification: {}",
                    sibling.node_id, e
                );
            }
        }
    }
}

/// Re-parents the local standby under `new_primary`, recording the follow
/// under `event_kind` (the supervisor and the operator command log different
/// kinds for the same action).
pub async fn follow_new_primary(
    ctx: &FailoverContext<'_>,
    new_primary: &NodeRecord,
    event_kind: EventKind,
) -> Result<FollowOutcome, RepGuardError> {
    // The target must already be a working primary.
    let target = match EngineClient::connect(
        &new_primary.conninfo,
        ctx.config.connection_timeout,
    )
    .await
    {
        Ok(client) => client,
        Err(e) => {
            return Ok(FollowOutcome::Failed(format!(
                "new primary {} is unreachable: {e}",
                new_primary.node_id
            )));
        }
    };
    match target.is_in_recovery().await {
        Ok(false) => {}
        Ok(true) => {
            return Ok(FollowOutcome::Failed(format!(
                "node {} is still in recovery; cannot follow it",
                new_primary.node_id
            )));
        }
        Err(e) => return Ok(FollowOutcome::Failed(e.to_string())),
    }

    // Timeline sanity: refuse impossible attachments before touching anything.
    if let Err(e) = check_attach_safety(ctx.config, &target).await {
        return Ok(FollowOutcome::Failed(e.to_string()));
    }

    // The follow command restarts the local engine; drop our connection first.
    let follow_command = ctx
        .config
        .follow_command
        .clone()
        .ok_or_else(|| RepGuardError::Config("no follow command configured".to_string()))?;
    if let Err(e) = run_local_command(&follow_command).await {
        return Ok(FollowOutcome::Failed(e.to_string()));
    }

    let local = match reconnect_local(ctx.config).await {
        Ok(client) => client,
        Err(e) => return Ok(FollowOutcome::Failed(e.to_string())),
    };

    // Re-parent the catalog record through the new primary.
    let catalog = Catalog::new(&target);
    catalog
        .set_upstream(ctx.local_record.node_id, Some(new_primary.node_id))
        .await?;

    ctx.notifier
        .record(
            Some(&target),
            ctx.local_record.node_id,
            event_kind,
            true,
            &format!(
                "node {} now following node {}",
                ctx.local_record.node_id, new_primary.node_id
            ),
        )
        .await;

    ctx.shared.reset_voting_status();
    drop(local);
    info!(
        "now following node {} ({})",
        new_primary.node_id, new_primary.node_name
    );
    Ok(FollowOutcome::Followed)
}

/// Gathers local and target positions and applies the attach-safety rules.
/// Following never rewinds; a divergence that needs one is surfaced as an
/// error and left to `node rejoin`.
async fn check_attach_safety(
    config: &NodeConfig,
    target: &EngineClient,
) -> Result<(), RepGuardError> {
    let local = EngineClient::connect(&config.conninfo, config.connection_timeout).await?;
    let local_identity = local.identity().await?;
    let local_lsn = local.last_receive_lsn().await?;
    let target_identity = target.identity().await?;
    let target_positions = target.wal_positions().await?;

    let local_position = NodePosition {
        system_identifier: local_identity.system_identifier,
        timeline: local_identity.timeline,
        lsn: local_lsn,
    };
    let target_position = NodePosition {
        system_identifier: target_identity.system_identifier,
        timeline: target_identity.timeline,
        lsn: target_positions.newest().unwrap_or_default(),
    };

    let fork_end = if target_identity.timeline > local_identity.timeline {
        let history = target.timeline_history(target_identity.timeline).await?;
        TimelineHistoryEntry::fork_end(&history, local_identity.timeline)
    } else {
        None
    };

    match attach_safety(&local_position, &target_position, fork_end) {
        AttachDecision::Safe => Ok(()),
        AttachDecision::NeedsRewind(reason) | AttachDecision::Refuse(reason) => {
            Err(RepGuardError::Timeline(reason))
        }
    }
}

async fn reconnect_local(config: &NodeConfig) -> Result<EngineClient, RepGuardError> {
    let deadline = tokio::time::Instant::now() + config.standby_reconnect_timeout;
    loop {
        match EngineClient::connect(&config.conninfo, config.connection_timeout).await {
            Ok(client) => return Ok(client),
            Err(e) if tokio::time::Instant::now() < deadline => {
                warn!("local engine not back yet: {}; retrying", e);
                sleep(Duration::from_secs(1)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Polls until the engine reports itself out of recovery, bounded by
/// [`PROMOTION_VERIFY_TIMEOUT`].
pub async fn verify_out_of_recovery(client: &EngineClient) -> Result<(), RepGuardError> {
    let deadline = tokio::time::Instant::now() + PROMOTION_VERIFY_TIMEOUT;
    loop {
        match client.is_in_recovery().await {
            Ok(false) => return Ok(()),
            Ok(true) if tokio::time::Instant::now() < deadline => {
                sleep(PROMOTION_VERIFY_INTERVAL).await;
            }
            Ok(true) => {
                return Err(RepGuardError::Internal(
                    "promotion command succeeded but the engine is still in recovery".to_string(),
                ));
            }
            Err(e) => return Err(e),
        }
    }
}

// src/core/election/mod.rs

//! The distributed election run by a standby when its primary upstream has
//! been declared down.
//!
//! The protocol has five phases: a randomised jitter, self-nomination,
//! candidature broadcast, the primary-location witness check, and vote
//! collection. It is deliberately not a consensus algorithm — correctness
//! rests on first-writer-wins candidature at every peer plus a deterministic
//! best-candidate rule over a shared snapshot, and the location check is a
//! partition heuristic, not a quorum. A full site partition that isolates a
//! standby together with no peer from the primary's location cancels the
//! election rather than risking a second primary.

pub mod snapshot;

use crate::config::NodeConfig;
use crate::core::catalog::{Catalog, NodeRecord, NodeType};
use crate::core::errors::RepGuardError;
use crate::core::gateway::EngineClient;
use crate::core::peer::PeerClient;
use crate::core::shared::{SharedState, VotingStatus};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub use snapshot::{SiblingInfo, VoteTally, best_candidate, primary_location_visible};

/// Election jitter bounds: a short random delay before self-nomination so
/// that simultaneous candidatures are rare.
pub const JITTER_MIN_MS: u64 = 100;
pub const JITTER_MAX_MS: u64 = 350;

/// How long a non-winning standby waits for the new-primary announcement.
pub const ELECTION_NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(60);
const NOTIFICATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one election run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// Unanimous vote: this node should promote itself.
    Won { term: u64, snapshot: Vec<SiblingInfo> },
    /// Not unanimous. `best` is the node the deterministic rule selects from
    /// the final snapshot; when it is this node, the caller still promotes.
    Lost { best: Option<i32>, snapshot: Vec<SiblingInfo> },
    /// This node withdrew: it had already granted a vote, or another node
    /// claimed candidature first.
    NotCandidate,
    /// The primary-location witness check failed; no promotion may happen on
    /// this side of the partition.
    Cancelled,
}

/// Everything an election run needs.
pub struct ElectionContext<'a> {
    pub config: &'a NodeConfig,
    pub shared: Arc<SharedState>,
    /// Gateway to the local engine; used for the own-LSN read.
    pub local: &'a EngineClient,
    pub local_record: &'a NodeRecord,
    pub upstream: &'a NodeRecord,
}

/// Runs one complete election cycle. The caller owns the follow-up: promote
/// on `Won` (or on `Lost` naming self as best), notify and wait otherwise.
pub async fn run_election(ctx: &ElectionContext<'_>) -> Result<ElectionOutcome, RepGuardError> {
    if ctx.local_record.node_type == NodeType::Witness {
        debug!("witness nodes do not stand in elections");
        return Ok(ElectionOutcome::NotCandidate);
    }

    // Phase 1: jitter.
    let jitter = {
        let mut rng = SmallRng::from_entropy();
        Duration::from_millis(rng.gen_range(JITTER_MIN_MS..=JITTER_MAX_MS))
    };
    debug!("election jitter: sleeping {:?}", jitter);
    sleep(jitter).await;

    // Phase 2: self-nomination. A node that has already granted its vote this
    // cycle is a voter, not a candidate.
    if ctx.shared.voting_status() == VotingStatus::VoteRequestReceived {
        info!("vote already granted this cycle; standing down as candidate");
        return Ok(ElectionOutcome::NotCandidate);
    }
    let Some(term) = ctx.shared.set_voting_status_initiated() else {
        info!("voting status changed concurrently; standing down as candidate");
        return Ok(ElectionOutcome::NotCandidate);
    };
    info!("initiating election in term {}", term);

    // Phase 3: fresh sibling discovery and candidature broadcast.
    let catalog = Catalog::new(ctx.local);
    let siblings = catalog
        .get_active_sibling_nodes(ctx.local_record.node_id, ctx.upstream.node_id)
        .await?;
    let mut snapshot: Vec<SiblingInfo> =
        siblings.iter().map(SiblingInfo::from_record).collect();

    // Peer connections are opened per phase and closed before the next one.
    for sibling in snapshot.iter_mut() {
        match PeerClient::connect(&sibling.peer_addr, ctx.config.connection_timeout).await {
            Ok(mut peer) => {
                sibling.is_visible = true;
                match peer
                    .announce_candidature(ctx.local_record.node_id, term)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        // First-writer-wins resolved against us: another node
                        // is already the candidate for this term.
                        info!(
                            "node {} already acknowledges a candidate for term {}; withdrawing",
                            sibling.node_id, term
                        );
                        ctx.shared.reset_voting_status();
                        return Ok(ElectionOutcome::NotCandidate);
                    }
                    Err(e) => {
                        warn!(
                            "candidature announcement to node {} failed: {}",
                            sibling.node_id, e
                        );
                        sibling.is_visible = false;
                    }
                }
            }
            Err(e) => {
                debug!("sibling node {} is unreachable: {}", sibling.node_id, e);
            }
        }
    }

    // Phase 4: primary-location witness check.
    if !primary_location_visible(&snapshot, &ctx.upstream.location) {
        warn!(
            "no reachable sibling or witness in the failed primary's location \"{}\"; \
             this node may be partitioned from the primary's site — cancelling the election",
            ctx.upstream.location
        );
        ctx.shared.reset_voting_status();
        return Ok(ElectionOutcome::Cancelled);
    }

    // Phase 5: vote collection.
    let own_lsn = ctx.local.last_receive_lsn().await?;
    info!("collecting votes in term {} (own position {})", term, own_lsn);

    let mut tally = VoteTally::default();
    for sibling in snapshot.iter_mut() {
        if !sibling.is_visible || sibling.node_type != NodeType::Standby {
            continue;
        }
        let reply = match PeerClient::connect(&sibling.peer_addr, ctx.config.connection_timeout)
            .await
        {
            Ok(mut peer) => match peer.request_vote(ctx.local_record.node_id, term).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("vote request to node {} failed: {}", sibling.node_id, e);
                    None
                }
            },
            Err(e) => {
                // Still counted: the node was visible when the cycle began.
                warn!("node {} became unreachable before voting: {}", sibling.node_id, e);
                None
            }
        };
        if let Some(peer_lsn) = reply {
            sibling.last_receive_lsn = Some(peer_lsn);
        }
        tally.record(own_lsn, reply);
    }
    tally.close();

    info!(
        "election term {}: {} of {} votes{}",
        term,
        tally.votes,
        tally.visible_nodes,
        if tally.other_node_is_ahead {
            " (a sibling is ahead)"
        } else {
            ""
        }
    );

    if tally.won() {
        return Ok(ElectionOutcome::Won { term, snapshot });
    }

    // Lost: compute the node everyone should converge on from the final
    // snapshot, including ourselves as a pseudo-sibling.
    let mut full_snapshot = snapshot.clone();
    full_snapshot.push(SiblingInfo {
        node_id: ctx.local_record.node_id,
        node_name: ctx.local_record.node_name.clone(),
        node_type: ctx.local_record.node_type,
        priority: ctx.local_record.priority,
        location: ctx.local_record.location.clone(),
        conninfo: ctx.local_record.conninfo.clone(),
        peer_addr: ctx.local_record.peer_addr.clone(),
        last_receive_lsn: Some(own_lsn),
        is_visible: true,
    });
    let best = best_candidate(&full_snapshot).map(|s| s.node_id);
    Ok(ElectionOutcome::Lost {
        best,
        snapshot: full_snapshot,
    })
}

/// Tells `best` it should become the new primary. Called by a losing node
/// whose deterministic rule selected a different winner.
pub async fn notify_best_candidate(
    snapshot: &[SiblingInfo],
    best: i32,
    connection_timeout: Duration,
) -> Result<(), RepGuardError> {
    let Some(target) = snapshot.iter().find(|s| s.node_id == best) else {
        return Err(RepGuardError::Internal(format!(
            "best candidate {best} is not in the sibling snapshot"
        )));
    };
    let mut peer = PeerClient::connect(&target.peer_addr, connection_timeout).await?;
    peer.notify_follow_primary(best).await?;
    info!("notified node {} that it is the promotion candidate", best);
    Ok(())
}

/// Polls the local shared state for the new-primary announcement, once per
/// second, bounded by [`ELECTION_NOTIFICATION_TIMEOUT`]. Returns the new
/// primary's node id, or `None` on timeout — in which case the monitor loop
/// may re-initiate the election on its next cycle.
pub async fn wait_for_new_primary(shared: &SharedState) -> Option<i32> {
    let deadline = tokio::time::Instant::now() + ELECTION_NOTIFICATION_TIMEOUT;
    loop {
        if let Some(node_id) = shared.get_new_primary() {
            return Some(node_id);
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(
                "no new-primary announcement within {}s",
                ELECTION_NOTIFICATION_TIMEOUT.as_secs()
            );
            return None;
        }
        sleep(NOTIFICATION_POLL_INTERVAL).await;
    }
}

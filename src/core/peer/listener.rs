// src/core/peer/listener.rs

//! The TCP listener serving this node's shared-state functions to its peers.
//!
//! Dispatch is intentionally thin: every operation maps onto one shared-state
//! call. The single wrinkle is `request_vote`, which must return this node's
//! current WAL receive position — that is read fresh from the local engine at
//! grant time, not cached, so the voter's position is honest.

use crate::core::errors::RepGuardError;
use crate::core::gateway::EngineClient;
use crate::core::lsn::Lsn;
use crate::core::peer::{PeerRequest, PeerResponse};
use crate::core::shared::SharedState;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Everything the listener needs to answer peer calls.
#[derive(Clone)]
pub struct ListenerContext {
    pub state: Arc<SharedState>,
    /// Connection string of the local engine, for the fresh LSN read on vote
    /// grants.
    pub local_conninfo: String,
    pub connection_timeout: Duration,
}

/// Binds and runs the coordination listener until the task is aborted.
pub async fn run_peer_listener(
    bind_addr: String,
    ctx: ListenerContext,
) -> Result<(), RepGuardError> {
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| RepGuardError::Peer(format!("cannot bind {bind_addr}: {e}")))?;
    info!("coordination listener ready on {}", bind_addr);
    serve(listener, ctx).await
}

/// Serves peer connections on an already-bound listener.
pub async fn serve(listener: TcpListener, ctx: ListenerContext) -> Result<(), RepGuardError> {
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    debug!("accepted peer connection from {}", addr);
                    if let Err(e) = handle_connection(socket, ctx).await {
                        warn!("error handling peer connection from {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                warn!("failed to accept peer connection: {}", e);
            }
        }
    }
}

/// Handles a single peer connection, one request line at a time.
async fn handle_connection(
    socket: TcpStream,
    ctx: ListenerContext,
) -> Result<(), RepGuardError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(result) = framed.next().await {
        let line = match result {
            Ok(line) => line,
            Err(e) => {
                warn!("error decoding peer request: {}", e);
                break;
            }
        };

        let response = match serde_json::from_str::<PeerRequest>(&line) {
            Ok(request) => dispatch(request, &ctx).await,
            Err(e) => PeerResponse::Error {
                message: format!("unparseable request: {e}"),
            },
        };

        let line = serde_json::to_string(&response)?;
        if let Err(e) = framed.send(line).await {
            warn!("error sending peer response: {}", e);
            break;
        }
    }
    Ok(())
}

/// Maps one request onto the shared-state function it names.
async fn dispatch(request: PeerRequest, ctx: &ListenerContext) -> PeerResponse {
    let state = &ctx.state;
    match request {
        PeerRequest::RequestVote { requester, term } => {
            // Read the local receive position before taking the vote
            // decision; a grant must carry a position the candidate can
            // compare against.
            let lsn = match local_receive_lsn(ctx).await {
                Some(lsn) => lsn,
                None => {
                    warn!(
                        "vote requested by node {} but the local engine is unreachable; \
                         withholding the vote",
                        requester
                    );
                    return PeerResponse::Vote { lsn: None };
                }
            };
            let granted = state.request_vote(requester, term, lsn);
            if granted.is_some() {
                info!("granted vote to node {} in term {}", requester, term);
            } else {
                debug!(
                    "refused vote to node {} in term {} (status {})",
                    requester,
                    term,
                    state.voting_status()
                );
            }
            PeerResponse::Vote { lsn: granted }
        }
        PeerRequest::GetVotingStatus => PeerResponse::VotingStatus {
            status: state.voting_status(),
        },
        PeerRequest::AnnounceCandidature { requester, term } => {
            let granted = state.announce_candidature(requester, term);
            info!(
                "candidature claim by node {} for term {}: {}",
                requester,
                term,
                if granted { "accepted" } else { "already taken" }
            );
            PeerResponse::Granted { granted }
        }
        PeerRequest::NotifyFollowPrimary { node_id } => {
            info!("notified that node {} is the new primary", node_id);
            state.notify_follow_primary(node_id);
            PeerResponse::Ok
        }
        PeerRequest::GetNewPrimary => PeerResponse::NewPrimary {
            node_id: state.get_new_primary(),
        },
        PeerRequest::ResetVotingStatus => {
            state.reset_voting_status();
            PeerResponse::Ok
        }
        PeerRequest::GetLastUpdated => PeerResponse::LastUpdated {
            epoch_seconds: state.last_updated().map(|t| t.timestamp()),
        },
        PeerRequest::SetPaused { paused } => {
            info!(
                "supervisor {} by peer request",
                if paused { "paused" } else { "unpaused" }
            );
            state.set_paused(paused);
            PeerResponse::Ok
        }
        PeerRequest::IsPaused => PeerResponse::Paused {
            paused: state.is_paused(),
        },
        PeerRequest::IsRunning => PeerResponse::Running {
            running: true,
            pid: state.daemon_pid(),
        },
        PeerRequest::GetPid => PeerResponse::Running {
            running: true,
            pid: state.daemon_pid(),
        },
    }
}

/// Reads the local engine's WAL receive position for a vote grant.
async fn local_receive_lsn(ctx: &ListenerContext) -> Option<Lsn> {
    let client = EngineClient::connect(&ctx.local_conninfo, ctx.connection_timeout)
        .await
        .ok()?;
    client.last_receive_lsn().await.ok()
}

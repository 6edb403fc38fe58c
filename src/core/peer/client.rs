// src/core/peer/client.rs

//! A small internal client for calling the coordination functions served by a
//! peer supervisor.

use crate::core::errors::RepGuardError;
use crate::core::lsn::Lsn;
use crate::core::peer::{PeerRequest, PeerResponse};
use crate::core::shared::VotingStatus;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// A connection to one peer supervisor's coordination listener.
#[derive(Debug)]
pub struct PeerClient {
    framed: Framed<TcpStream, LinesCodec>,
    addr: String,
}

impl PeerClient {
    /// Attempts to connect to a peer with a bounded timeout.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, RepGuardError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                RepGuardError::Peer(format!("timed out connecting to peer at {addr}"))
            })?
            .map_err(|e| RepGuardError::Peer(format!("cannot reach peer at {addr}: {e}")))?;
        Ok(Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends one request and waits for its response line.
    pub async fn call(&mut self, request: PeerRequest) -> Result<PeerResponse, RepGuardError> {
        let line = serde_json::to_string(&request)?;
        self.framed
            .send(line)
            .await
            .map_err(|e| RepGuardError::Peer(format!("send to {} failed: {e}", self.addr)))?;

        let reply = tokio::time::timeout(READ_TIMEOUT, self.framed.next())
            .await
            .map_err(|_| {
                RepGuardError::Peer(format!("timed out waiting for reply from {}", self.addr))
            })?
            .ok_or_else(|| {
                RepGuardError::Peer(format!("peer {} closed the connection", self.addr))
            })?
            .map_err(|e| RepGuardError::Peer(format!("read from {} failed: {e}", self.addr)))?;

        let response: PeerResponse = serde_json::from_str(&reply)?;
        if let PeerResponse::Error { message } = &response {
            return Err(RepGuardError::Peer(format!("{}: {message}", self.addr)));
        }
        Ok(response)
    }

    // --- Typed wrappers over the coordination function set ---

    pub async fn request_vote(
        &mut self,
        requester: i32,
        term: u64,
    ) -> Result<Option<Lsn>, RepGuardError> {
        match self.call(PeerRequest::RequestVote { requester, term }).await? {
            PeerResponse::Vote { lsn } => Ok(lsn),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    pub async fn get_voting_status(&mut self) -> Result<VotingStatus, RepGuardError> {
        match self.call(PeerRequest::GetVotingStatus).await? {
            PeerResponse::VotingStatus { status } => Ok(status),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    pub async fn announce_candidature(
        &mut self,
        requester: i32,
        term: u64,
    ) -> Result<bool, RepGuardError> {
        match self
            .call(PeerRequest::AnnounceCandidature { requester, term })
            .await?
        {
            PeerResponse::Granted { granted } => Ok(granted),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    pub async fn notify_follow_primary(&mut self, node_id: i32) -> Result<(), RepGuardError> {
        match self.call(PeerRequest::NotifyFollowPrimary { node_id }).await? {
            PeerResponse::Ok => Ok(()),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    pub async fn get_new_primary(&mut self) -> Result<Option<i32>, RepGuardError> {
        match self.call(PeerRequest::GetNewPrimary).await? {
            PeerResponse::NewPrimary { node_id } => Ok(node_id),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    pub async fn reset_voting_status(&mut self) -> Result<(), RepGuardError> {
        match self.call(PeerRequest::ResetVotingStatus).await? {
            PeerResponse::Ok => Ok(()),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    pub async fn set_paused(&mut self, paused: bool) -> Result<(), RepGuardError> {
        match self.call(PeerRequest::SetPaused { paused }).await? {
            PeerResponse::Ok => Ok(()),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    pub async fn is_paused(&mut self) -> Result<bool, RepGuardError> {
        match self.call(PeerRequest::IsPaused).await? {
            PeerResponse::Paused { paused } => Ok(paused),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    pub async fn is_running(&mut self) -> Result<(bool, Option<u32>), RepGuardError> {
        match self.call(PeerRequest::IsRunning).await? {
            PeerResponse::Running { running, pid } => Ok((running, pid)),
            other => Err(unexpected(&self.addr, &other)),
        }
    }

    pub async fn last_updated(&mut self) -> Result<Option<i64>, RepGuardError> {
        match self.call(PeerRequest::GetLastUpdated).await? {
            PeerResponse::LastUpdated { epoch_seconds } => Ok(epoch_seconds),
            other => Err(unexpected(&self.addr, &other)),
        }
    }
}

fn unexpected(addr: &str, response: &PeerResponse) -> RepGuardError {
    RepGuardError::Protocol(format!("unexpected reply from {addr}: {response:?}"))
}

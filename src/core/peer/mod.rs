// src/core/peer/mod.rs

//! The supervisor-to-supervisor coordination surface.
//!
//! Each supervisor serves the shared-state function set (votes, candidature,
//! follow announcements, pause control) over a small newline-delimited JSON
//! protocol on its own port. The functions and their contracts mirror the
//! shared-state module exactly; the listener is a thin dispatch layer and
//! holds no state of its own.

pub mod client;
pub mod listener;

use crate::core::lsn::Lsn;
use crate::core::shared::VotingStatus;
use serde::{Deserialize, Serialize};

pub use client::PeerClient;
pub use listener::run_peer_listener;

/// A request to a peer supervisor. One request per line; one response per line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PeerRequest {
    /// Ask the peer for its vote in `term`. Replies with the peer's WAL
    /// receive position when the vote is granted.
    RequestVote { requester: i32, term: u64 },
    GetVotingStatus,
    /// Claim candidacy for `term` on this peer. First writer wins.
    AnnounceCandidature { requester: i32, term: u64 },
    /// Tell the peer which node is (or will be) the new primary.
    NotifyFollowPrimary { node_id: i32 },
    GetNewPrimary,
    ResetVotingStatus,
    GetLastUpdated,
    SetPaused { paused: bool },
    IsPaused,
    /// Liveness check for the supervisor itself (not the engine).
    IsRunning,
    GetPid,
}

/// A response from a peer supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PeerResponse {
    /// Vote reply: `lsn` is `None` when the vote was not granted.
    Vote { lsn: Option<Lsn> },
    VotingStatus { status: VotingStatus },
    Granted { granted: bool },
    NewPrimary { node_id: Option<i32> },
    LastUpdated { epoch_seconds: Option<i64> },
    Paused { paused: bool },
    Running { running: bool, pid: Option<u32> },
    Ok,
    Error { message: String },
}

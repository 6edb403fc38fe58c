// src/core/shared.rs

//! The per-process shared failover state: vote, term, and candidate tracking
//! exposed to local callers and, through the peer listener, to every sibling
//! supervisor.
//!
//! All mutating calls take the writer lock over the whole block; reads take
//! the shared lock. That lock boundary is the sole synchronisation — there
//! are no other fences, and no call holds the lock across a suspension point.

use crate::core::lsn::Lsn;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Voting posture of this node within the current election cycle.
///
/// Transitions only `NoVote -> (VoteRequestReceived | VoteInitiated) -> NoVote`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VotingStatus {
    NoVote,
    VoteRequestReceived,
    VoteInitiated,
}

#[derive(Debug)]
struct FailoverStateBlock {
    local_node_id: Option<i32>,
    electoral_term: u64,
    voting_status: VotingStatus,
    /// Node currently acknowledged as candidate, with the term it claimed.
    candidate_node_id: Option<i32>,
    candidate_term: u64,
    follow_new_primary: bool,
    last_updated: Option<DateTime<Utc>>,
    paused: bool,
    daemon_pid: Option<u32>,
}

/// The process-wide shared failover state for one node.
#[derive(Debug)]
pub struct SharedState {
    block: RwLock<FailoverStateBlock>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            block: RwLock::new(FailoverStateBlock {
                local_node_id: None,
                electoral_term: 0,
                voting_status: VotingStatus::NoVote,
                candidate_node_id: None,
                candidate_term: 0,
                follow_new_primary: false,
                last_updated: None,
                paused: false,
                daemon_pid: None,
            }),
        }
    }

    /// Set once at supervisor startup.
    pub fn set_local_node_id(&self, node_id: i32) {
        self.block.write().local_node_id = Some(node_id);
    }

    pub fn local_node_id(&self) -> Option<i32> {
        self.block.read().local_node_id
    }

    /// Records that a peer asked for our vote. Grants the vote — returning
    /// the supplied local receive position — only from the `NoVote` state;
    /// a node that is itself a candidate, or that already granted a vote
    /// this cycle, answers `None`.
    pub fn request_vote(&self, requester: i32, term: u64, local_receive_lsn: Lsn) -> Option<Lsn> {
        let mut block = self.block.write();
        if block.voting_status != VotingStatus::NoVote {
            return None;
        }
        block.voting_status = VotingStatus::VoteRequestReceived;
        block.electoral_term = block.electoral_term.max(term);
        block.candidate_node_id = Some(requester);
        block.candidate_term = term;
        Some(local_receive_lsn)
    }

    pub fn voting_status(&self) -> VotingStatus {
        self.block.read().voting_status
    }

    pub fn electoral_term(&self) -> u64 {
        self.block.read().electoral_term
    }

    /// Transitions `NoVote -> VoteInitiated` atomically, bumping and
    /// returning the new electoral term. Returns `None` when the node is not
    /// in `NoVote` — it has already voted, or already initiated.
    pub fn set_voting_status_initiated(&self) -> Option<u64> {
        let mut block = self.block.write();
        if block.voting_status != VotingStatus::NoVote {
            return None;
        }
        block.voting_status = VotingStatus::VoteInitiated;
        block.electoral_term += 1;
        let term = block.electoral_term;
        block.candidate_node_id = block.local_node_id;
        block.candidate_term = term;
        Some(term)
    }

    /// A peer claims candidacy for `term`. First writer wins: the claim
    /// succeeds iff no candidate is recorded for that term yet.
    pub fn announce_candidature(&self, requester: i32, term: u64) -> bool {
        let mut block = self.block.write();
        if block.candidate_term == term && block.candidate_node_id.is_some() {
            return block.candidate_node_id == Some(requester);
        }
        block.candidate_node_id = Some(requester);
        block.candidate_term = term;
        block.electoral_term = block.electoral_term.max(term);
        true
    }

    /// Announces the designated new primary; the local monitor loop observes
    /// this and re-parents to it.
    pub fn notify_follow_primary(&self, node_id: i32) {
        let mut block = self.block.write();
        block.candidate_node_id = Some(node_id);
        block.follow_new_primary = true;
    }

    /// The announced new primary, if an announcement has arrived.
    pub fn get_new_primary(&self) -> Option<i32> {
        let block = self.block.read();
        if block.follow_new_primary {
            block.candidate_node_id
        } else {
            None
        }
    }

    /// Returns the state to `NoVote` at the end of an election cycle. The
    /// electoral term is retained; it only ever grows.
    pub fn reset_voting_status(&self) {
        let mut block = self.block.write();
        block.voting_status = VotingStatus::NoVote;
        block.candidate_node_id = None;
        block.follow_new_primary = false;
    }

    // --- Monitoring heartbeat ---

    pub fn set_last_updated(&self) {
        self.block.write().last_updated = Some(Utc::now());
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.block.read().last_updated
    }

    // --- Supervisor pause surface ---

    pub fn set_paused(&self, paused: bool) {
        self.block.write().paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.block.read().paused
    }

    pub fn set_daemon_pid(&self, pid: u32) {
        self.block.write().daemon_pid = Some(pid);
    }

    pub fn daemon_pid(&self) -> Option<u32> {
        self.block.read().daemon_pid
    }
}

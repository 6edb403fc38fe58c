// src/core/election/snapshot.rs

//! The sibling snapshot and the pure decision rules applied to it: the
//! best-candidate total order, the vote tally, and the primary-location
//! witness check.
//!
//! Keeping these rules free of I/O matters: every node that evaluates the
//! same snapshot must reach the same conclusion.

use crate::core::catalog::{NodeRecord, NodeType};
use crate::core::lsn::Lsn;
use std::cmp::Ordering;

/// One sibling as seen at the start of an election cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingInfo {
    pub node_id: i32,
    pub node_name: String,
    pub node_type: NodeType,
    pub priority: i32,
    pub location: String,
    pub conninfo: String,
    pub peer_addr: String,
    /// Last WAL receive position, learned from the vote response. `None`
    /// until the peer has answered.
    pub last_receive_lsn: Option<Lsn>,
    pub is_visible: bool,
}

impl SiblingInfo {
    pub fn from_record(record: &NodeRecord) -> Self {
        Self {
            node_id: record.node_id,
            node_name: record.node_name.clone(),
            node_type: record.node_type,
            priority: record.priority,
            location: record.location.clone(),
            conninfo: record.conninfo.clone(),
            peer_addr: record.peer_addr.clone(),
            last_receive_lsn: None,
            is_visible: false,
        }
    }

    /// Whether this sibling can stand in an election at all.
    pub fn is_electable(&self) -> bool {
        self.is_visible && self.node_type == NodeType::Standby && self.priority > 0
    }
}

/// Selects the node that every participant should agree is the strongest
/// promotion candidate: highest receive position, then highest priority,
/// then lowest node id. The ordering is total, so the same snapshot always
/// produces the same answer.
pub fn best_candidate(snapshot: &[SiblingInfo]) -> Option<&SiblingInfo> {
    snapshot
        .iter()
        .filter(|s| s.is_electable())
        .max_by(|a, b| {
            match a
                .last_receive_lsn
                .unwrap_or(Lsn::INVALID)
                .cmp(&b.last_receive_lsn.unwrap_or(Lsn::INVALID))
            {
                Ordering::Equal => match a.priority.cmp(&b.priority) {
                    // Lowest node id wins the final tie, so the "greater"
                    // element is the one with the smaller id.
                    Ordering::Equal => b.node_id.cmp(&a.node_id),
                    other => other,
                },
                other => other,
            }
        })
}

/// Split-brain guard: true when at least one reachable sibling — witness
/// nodes count — shares the lost primary's location tag. When false, this
/// node may be on the minority side of a partition and must not promote.
///
/// This is a heuristic, not a quorum: it only works when a sibling or
/// witness is configured in the primary's location.
pub fn primary_location_visible(snapshot: &[SiblingInfo], primary_location: &str) -> bool {
    snapshot
        .iter()
        .any(|s| s.is_visible && s.location == primary_location)
}

/// Accumulates vote responses during the collection phase.
#[derive(Debug, Default, Clone, Copy)]
pub struct VoteTally {
    pub votes: usize,
    pub visible_nodes: usize,
    pub other_node_is_ahead: bool,
}

impl VoteTally {
    /// Folds in one vote response. A reply of `None` means the peer declined;
    /// a granted vote only counts when the voter is not ahead of us.
    pub fn record(&mut self, own_lsn: Lsn, peer_lsn: Option<Lsn>) {
        self.visible_nodes += 1;
        match peer_lsn {
            Some(peer_lsn) if peer_lsn > own_lsn => {
                self.other_node_is_ahead = true;
            }
            Some(_) => {
                self.votes += 1;
            }
            None => {}
        }
    }

    /// Adds the self-vote, permitted only when no peer is ahead.
    pub fn close(&mut self) {
        self.visible_nodes += 1;
        if !self.other_node_is_ahead {
            self.votes += 1;
        }
    }

    /// Unanimity: the election is won only when every visible node voted for
    /// us, self included.
    pub fn won(&self) -> bool {
        self.visible_nodes > 0 && self.votes == self.visible_nodes
    }
}

// tests/property/election_invariants_test.rs

//! Protocol invariants of the shared failover state and the best-candidate
//! rule, exercised over arbitrary operation sequences and snapshots.

use proptest::prelude::*;
use repguard::core::catalog::NodeType;
use repguard::core::election::snapshot::{SiblingInfo, best_candidate};
use repguard::core::lsn::Lsn;
use repguard::core::shared::SharedState;

/// One arbitrary call against a shared-state block.
#[derive(Debug, Clone)]
enum Op {
    RequestVote { requester: i32, term: u64 },
    Initiate,
    Announce { requester: i32, term: u64 },
    NotifyFollow { node_id: i32 },
    Reset,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1..20i32, 0..50u64).prop_map(|(requester, term)| Op::RequestVote { requester, term }),
        Just(Op::Initiate),
        (1..20i32, 0..50u64).prop_map(|(requester, term)| Op::Announce { requester, term }),
        (1..20i32).prop_map(|node_id| Op::NotifyFollow { node_id }),
        Just(Op::Reset),
    ]
}

/// Generates snapshots with unique node ids (the catalog guarantees that).
fn arbitrary_snapshot() -> impl Strategy<Value = Vec<SiblingInfo>> {
    prop::collection::vec((0..200i32, 0..3u8, any::<u64>(), any::<bool>()), 0..12).prop_map(
        |entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(index, (priority, kind, lsn, visible))| {
                    let node_id = index as i32 + 1;
                    SiblingInfo {
                        node_id,
                        node_name: format!("node{node_id}"),
                        node_type: match kind {
                            0 => NodeType::Standby,
                            1 => NodeType::Witness,
                            _ => NodeType::Primary,
                        },
                        priority,
                        location: "default".to_string(),
                        conninfo: format!("host=node{node_id}"),
                        peer_addr: format!("node{node_id}:7432"),
                        last_receive_lsn: Some(Lsn(lsn)),
                        is_visible: visible,
                    }
                })
                .collect()
        },
    )
}

proptest! {
    /// The electoral term never decreases, whatever sequence of calls a
    /// process and its peers make.
    #[test]
    fn test_term_is_monotone_under_any_call_sequence(ops in prop::collection::vec(op_strategy(), 1..100)) {
        let state = SharedState::new();
        state.set_local_node_id(1);
        let mut last_term = state.electoral_term();

        for op in ops {
            match op {
                Op::RequestVote { requester, term } => {
                    state.request_vote(requester, term, Lsn(0));
                }
                Op::Initiate => {
                    state.set_voting_status_initiated();
                }
                Op::Announce { requester, term } => {
                    state.announce_candidature(requester, term);
                }
                Op::NotifyFollow { node_id } => state.notify_follow_primary(node_id),
                Op::Reset => state.reset_voting_status(),
            }
            let term = state.electoral_term();
            prop_assert!(term >= last_term, "term went backwards: {} -> {}", last_term, term);
            last_term = term;
        }
    }

    /// For one term, the first candidature claim wins on every peer and all
    /// later claims by other nodes fail, regardless of claim order.
    #[test]
    fn test_one_candidate_per_term(
        claimants in prop::collection::vec(1..20i32, 2..10),
        term in 1..100u64,
    ) {
        let peer = SharedState::new();
        let first = claimants[0];
        prop_assert!(peer.announce_candidature(first, term));
        for claimant in &claimants[1..] {
            let granted = peer.announce_candidature(*claimant, term);
            prop_assert_eq!(granted, *claimant == first);
        }
    }

    /// A node that granted a vote cannot initiate candidature until reset.
    #[test]
    fn test_voter_is_locked_out_until_reset(requester in 2..20i32, term in 1..100u64) {
        let state = SharedState::new();
        state.set_local_node_id(1);
        prop_assert!(state.request_vote(requester, term, Lsn(0)).is_some());
        prop_assert!(state.set_voting_status_initiated().is_none());
        state.reset_voting_status();
        prop_assert!(state.set_voting_status_initiated().is_some());
    }

    /// The best-candidate rule is a pure function of the snapshot: shuffling
    /// the input never changes the answer, and the answer dominates every
    /// other electable sibling in (LSN, priority, -node_id) order.
    #[test]
    fn test_best_candidate_deterministic_and_maximal(
        mut snapshot in arbitrary_snapshot(),
        rotation in 0..12usize,
    ) {
        let chosen = best_candidate(&snapshot).map(|s| s.node_id);

        let len = snapshot.len().max(1);
        snapshot.rotate_left(rotation % len);
        let rotated = best_candidate(&snapshot).map(|s| s.node_id);
        prop_assert_eq!(chosen, rotated);

        if let Some(chosen_id) = chosen {
            let winner = snapshot.iter().find(|s| s.node_id == chosen_id).unwrap();
            prop_assert!(winner.is_electable());
            for other in snapshot.iter().filter(|s| s.is_electable()) {
                if other.node_id == winner.node_id {
                    continue;
                }
                let winner_key = (
                    winner.last_receive_lsn.unwrap_or(Lsn::INVALID),
                    winner.priority,
                    std::cmp::Reverse(winner.node_id),
                );
                let other_key = (
                    other.last_receive_lsn.unwrap_or(Lsn::INVALID),
                    other.priority,
                    std::cmp::Reverse(other.node_id),
                );
                prop_assert!(winner_key >= other_key);
            }
        } else {
            prop_assert!(snapshot.iter().all(|s| !s.is_electable()));
        }
    }
}

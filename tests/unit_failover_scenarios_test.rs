//! Cluster-level failover scenarios exercised at the shared-state and
//! decision-rule level: three nodes, a dead primary, and the vote/candidature
//! flows the supervisors would run against each other.

use repguard::core::catalog::NodeType;
use repguard::core::election::snapshot::{SiblingInfo, VoteTally, best_candidate};
use repguard::core::lsn::Lsn;
use repguard::core::shared::SharedState;

fn standby(node_id: i32, priority: i32, lsn: Lsn) -> (SiblingInfo, SharedState) {
    let info = SiblingInfo {
        node_id,
        node_name: format!("node{node_id}"),
        node_type: NodeType::Standby,
        priority,
        location: "dc1".to_string(),
        conninfo: format!("host=node{node_id}"),
        peer_addr: format!("node{node_id}:7432"),
        last_receive_lsn: Some(lsn),
        is_visible: true,
    };
    let state = SharedState::new();
    state.set_local_node_id(node_id);
    (info, state)
}

/// Primary A dies; standbys B (priority 100) and C (priority 50) are both
/// caught up to 0/1000. B initiates, wins unanimously, and C is told to
/// follow node 2.
#[test]
fn test_equal_lsn_failover_prefers_priority() {
    let caught_up: Lsn = "0/1000".parse().unwrap();
    let (b_info, b_state) = standby(2, 100, caught_up);
    let (c_info, c_state) = standby(3, 50, caught_up);

    // B self-nominates and claims candidature on C.
    let term = b_state.set_voting_status_initiated().unwrap();
    assert!(c_state.announce_candidature(b_info.node_id, term));

    // C grants its vote, reporting its receive position.
    let c_vote = c_state.request_vote(b_info.node_id, term, caught_up);
    let mut tally = VoteTally::default();
    tally.record(caught_up, c_vote);
    tally.close();
    assert!(tally.won());

    // Had the tally not been unanimous, the deterministic rule would still
    // pick B: equal positions, higher priority.
    let snapshot = vec![b_info.clone(), c_info];
    assert_eq!(best_candidate(&snapshot).unwrap().node_id, 2);

    // The winner announces itself; C's monitor will observe and re-parent.
    c_state.notify_follow_primary(b_info.node_id);
    assert_eq!(c_state.get_new_primary(), Some(2));
}

/// Same topology, but B has only replayed 0/900 while C reached 0/1000: the
/// most advanced node must win regardless of priority.
#[test]
fn test_most_advanced_standby_wins_failover() {
    let b_lsn: Lsn = "0/900".parse().unwrap();
    let c_lsn: Lsn = "0/1000".parse().unwrap();
    let (b_info, b_state) = standby(2, 100, b_lsn);
    let (c_info, c_state) = standby(3, 50, c_lsn);

    // B happens to initiate first.
    let term = b_state.set_voting_status_initiated().unwrap();
    assert!(c_state.announce_candidature(b_info.node_id, term));

    // C's granted vote reveals it is ahead; B cannot count it, nor itself.
    let c_vote = c_state.request_vote(b_info.node_id, term, c_lsn);
    let mut tally = VoteTally::default();
    tally.record(b_lsn, c_vote);
    tally.close();
    assert!(!tally.won());
    assert!(tally.other_node_is_ahead);

    // B loses and consults the rule over the final snapshot: C is best.
    let snapshot = vec![b_info, c_info.clone()];
    assert_eq!(best_candidate(&snapshot).unwrap().node_id, 3);

    // B defers: it notifies C that C should take over.
    c_state.reset_voting_status();
    c_state.notify_follow_primary(c_info.node_id);
    assert_eq!(c_state.get_new_primary(), Some(3));
}

/// Exactly two siblings tied on position and priority: the lower node id is
/// selected, on both nodes, from their (identical) snapshots.
#[test]
fn test_tied_siblings_resolve_to_lower_node_id() {
    let lsn: Lsn = "0/1000".parse().unwrap();
    let (b_info, _) = standby(2, 100, lsn);
    let (c_info, _) = standby(3, 100, lsn);

    let b_view = vec![b_info.clone(), c_info.clone()];
    let c_view = vec![c_info, b_info];
    assert_eq!(best_candidate(&b_view).unwrap().node_id, 2);
    assert_eq!(best_candidate(&c_view).unwrap().node_id, 2);
}

/// Two nodes initiate simultaneously: each already acknowledges itself as
/// candidate for the term, so each refuses the other's claim. Neither
/// proceeds — the retry jitter breaks the tie on the next cycle.
#[test]
fn test_concurrent_candidatures_never_both_proceed() {
    let lsn: Lsn = "0/1000".parse().unwrap();
    let (b_info, b_state) = standby(2, 100, lsn);
    let (c_info, c_state) = standby(3, 100, lsn);

    let b_term = b_state.set_voting_status_initiated().unwrap();
    let c_term = c_state.set_voting_status_initiated().unwrap();

    let b_claim_on_c = c_state.announce_candidature(b_info.node_id, b_term);
    let c_claim_on_b = b_state.announce_candidature(c_info.node_id, c_term);
    assert!(
        !(b_claim_on_c && c_claim_on_b),
        "two candidates may not both win candidature in the same term"
    );
}

/// A standby that granted its vote must not stand as a candidate itself
/// until the cycle is reset, even across repeated attempts.
#[test]
fn test_voter_lockout_persists_within_cycle() {
    let lsn: Lsn = "0/1000".parse().unwrap();
    let (_, c_state) = standby(3, 50, lsn);

    assert!(c_state.request_vote(2, 1, lsn).is_some());
    for _ in 0..3 {
        assert!(c_state.set_voting_status_initiated().is_none());
    }
    c_state.reset_voting_status();
    assert!(c_state.set_voting_status_initiated().is_some());
}

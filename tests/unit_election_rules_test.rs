use repguard::core::catalog::NodeType;
use repguard::core::election::snapshot::{
    SiblingInfo, VoteTally, best_candidate, primary_location_visible,
};
use repguard::core::lsn::Lsn;

fn sibling(node_id: i32, priority: i32, location: &str, lsn: &str) -> SiblingInfo {
    SiblingInfo {
        node_id,
        node_name: format!("node{node_id}"),
        node_type: NodeType::Standby,
        priority,
        location: location.to_string(),
        conninfo: format!("host=node{node_id}"),
        peer_addr: format!("node{node_id}:7432"),
        last_receive_lsn: Some(lsn.parse().unwrap()),
        is_visible: true,
    }
}

#[test]
fn test_equal_lsn_higher_priority_wins() {
    // Two standbys caught up to the same position: priority decides.
    let snapshot = vec![
        sibling(2, 100, "dc1", "0/1000"),
        sibling(3, 50, "dc1", "0/1000"),
    ];
    assert_eq!(best_candidate(&snapshot).unwrap().node_id, 2);
}

#[test]
fn test_most_advanced_lsn_beats_priority() {
    // A lagging high-priority node must not win over a caught-up one.
    let snapshot = vec![
        sibling(2, 100, "dc1", "0/900"),
        sibling(3, 50, "dc1", "0/1000"),
    ];
    assert_eq!(best_candidate(&snapshot).unwrap().node_id, 3);
}

#[test]
fn test_full_tie_lowest_node_id_wins() {
    let snapshot = vec![
        sibling(7, 100, "dc1", "0/1000"),
        sibling(4, 100, "dc1", "0/1000"),
        sibling(9, 100, "dc1", "0/1000"),
    ];
    assert_eq!(best_candidate(&snapshot).unwrap().node_id, 4);
}

#[test]
fn test_invisible_and_nonstandby_nodes_are_not_candidates() {
    let mut unreachable = sibling(2, 100, "dc1", "0/2000");
    unreachable.is_visible = false;
    let mut witness = sibling(3, 100, "dc1", "0/3000");
    witness.node_type = NodeType::Witness;
    let zero_priority = sibling(4, 0, "dc1", "0/4000");
    let standby = sibling(5, 10, "dc1", "0/1000");

    let snapshot = vec![unreachable, witness, zero_priority, standby];
    assert_eq!(best_candidate(&snapshot).unwrap().node_id, 5);
}

#[test]
fn test_empty_snapshot_has_no_candidate() {
    assert!(best_candidate(&[]).is_none());
}

#[test]
fn test_determinism_under_reordering() {
    let mut snapshot = vec![
        sibling(2, 100, "dc1", "0/1000"),
        sibling(3, 100, "dc1", "0/1000"),
        sibling(4, 50, "dc1", "0/2000"),
    ];
    let expected = best_candidate(&snapshot).unwrap().node_id;
    snapshot.reverse();
    assert_eq!(best_candidate(&snapshot).unwrap().node_id, expected);
    snapshot.swap(0, 1);
    assert_eq!(best_candidate(&snapshot).unwrap().node_id, expected);
}

#[test]
fn test_location_check_requires_peer_in_primary_location() {
    // Both peers in another site: the election must be cancelled.
    let snapshot = vec![
        sibling(2, 100, "dc2", "0/1000"),
        sibling(3, 100, "dc2", "0/1000"),
    ];
    assert!(!primary_location_visible(&snapshot, "dc1"));

    // A reachable witness in the primary's site satisfies the check.
    let mut witness = sibling(4, 0, "dc1", "0/0");
    witness.node_type = NodeType::Witness;
    let snapshot = vec![
        sibling(2, 100, "dc2", "0/1000"),
        witness,
    ];
    assert!(primary_location_visible(&snapshot, "dc1"));
}

#[test]
fn test_unreachable_peer_does_not_satisfy_location_check() {
    let mut peer = sibling(2, 100, "dc1", "0/1000");
    peer.is_visible = false;
    assert!(!primary_location_visible(&[peer], "dc1"));
}

#[test]
fn test_tally_win_requires_unanimity() {
    let own = Lsn(0x1000);
    let mut tally = VoteTally::default();
    tally.record(own, Some(Lsn(0x900)));
    tally.record(own, Some(Lsn(0x1000)));
    tally.close();
    // Two peer votes plus the self-vote out of three visible nodes.
    assert_eq!(tally.votes, 3);
    assert_eq!(tally.visible_nodes, 3);
    assert!(tally.won());
}

#[test]
fn test_tally_declined_vote_loses_election() {
    let own = Lsn(0x1000);
    let mut tally = VoteTally::default();
    tally.record(own, Some(Lsn(0x900)));
    tally.record(own, None); // peer declined
    tally.close();
    assert_eq!(tally.votes, 2);
    assert_eq!(tally.visible_nodes, 3);
    assert!(!tally.won());
}

#[test]
fn test_tally_peer_ahead_blocks_self_vote() {
    let own = Lsn(0x1000);
    let mut tally = VoteTally::default();
    tally.record(own, Some(Lsn(0x2000)));
    tally.close();
    assert!(tally.other_node_is_ahead);
    // The ahead peer's reply is not a vote for us, and no self-vote is cast.
    assert_eq!(tally.votes, 0);
    assert!(!tally.won());
}

use repguard::core::lsn::Lsn;
use repguard::core::shared::{SharedState, VotingStatus};

#[test]
fn test_initial_state() {
    let state = SharedState::new();
    assert_eq!(state.voting_status(), VotingStatus::NoVote);
    assert_eq!(state.electoral_term(), 0);
    assert_eq!(state.get_new_primary(), None);
    assert!(!state.is_paused());
}

#[test]
fn test_request_vote_grants_once_per_cycle() {
    let state = SharedState::new();
    state.set_local_node_id(3);

    let lsn = Lsn(0x1000);
    assert_eq!(state.request_vote(2, 1, lsn), Some(lsn));
    assert_eq!(state.voting_status(), VotingStatus::VoteRequestReceived);

    // Second request in the same cycle, any requester: no vote.
    assert_eq!(state.request_vote(4, 1, lsn), None);
    assert_eq!(state.request_vote(2, 2, lsn), None);

    // After the cycle ends the node can vote again.
    state.reset_voting_status();
    assert_eq!(state.request_vote(4, 2, lsn), Some(lsn));
}

#[test]
fn test_voter_cannot_become_candidate() {
    let state = SharedState::new();
    state.set_local_node_id(3);
    state.request_vote(2, 1, Lsn(0x1000));

    // Initiation requires the NoVote state.
    assert_eq!(state.set_voting_status_initiated(), None);

    state.reset_voting_status();
    assert_eq!(state.set_voting_status_initiated(), Some(2));
    assert_eq!(state.voting_status(), VotingStatus::VoteInitiated);
}

#[test]
fn test_term_is_monotone() {
    let state = SharedState::new();
    state.set_local_node_id(1);

    let first = state.set_voting_status_initiated().unwrap();
    state.reset_voting_status();
    let second = state.set_voting_status_initiated().unwrap();
    assert!(second > first);

    // Granting a vote for a higher term raises the local term.
    state.reset_voting_status();
    state.request_vote(2, 10, Lsn(0));
    assert_eq!(state.electoral_term(), 10);

    // A stale lower term never lowers it.
    state.reset_voting_status();
    state.request_vote(2, 3, Lsn(0));
    assert_eq!(state.electoral_term(), 10);
}

#[test]
fn test_candidature_first_writer_wins() {
    let state = SharedState::new();

    assert!(state.announce_candidature(5, 7));
    // Same term, different claimant: refused.
    assert!(!state.announce_candidature(6, 7));
    // Same claimant again: idempotent.
    assert!(state.announce_candidature(5, 7));
    // A new term opens a new claim.
    assert!(state.announce_candidature(6, 8));
}

#[test]
fn test_follow_announcement() {
    let state = SharedState::new();
    assert_eq!(state.get_new_primary(), None);

    state.notify_follow_primary(2);
    assert_eq!(state.get_new_primary(), Some(2));

    state.reset_voting_status();
    assert_eq!(state.get_new_primary(), None);
}

#[test]
fn test_reset_preserves_term() {
    let state = SharedState::new();
    state.set_local_node_id(1);
    let term = state.set_voting_status_initiated().unwrap();
    state.reset_voting_status();
    assert_eq!(state.voting_status(), VotingStatus::NoVote);
    assert_eq!(state.electoral_term(), term);
}

#[test]
fn test_pause_surface() {
    let state = SharedState::new();
    state.set_paused(true);
    assert!(state.is_paused());
    state.set_paused(false);
    assert!(!state.is_paused());

    state.set_daemon_pid(4242);
    assert_eq!(state.daemon_pid(), Some(4242));
}

#[test]
fn test_heartbeat() {
    let state = SharedState::new();
    assert!(state.last_updated().is_none());
    state.set_last_updated();
    assert!(state.last_updated().is_some());
}

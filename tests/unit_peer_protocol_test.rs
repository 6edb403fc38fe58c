//! End-to-end tests of the peer coordination surface: a real listener task
//! serving a real shared-state block, called through `PeerClient` over TCP.

use repguard::core::peer::listener::{ListenerContext, serve};
use repguard::core::peer::{PeerClient, PeerRequest, PeerResponse};
use repguard::core::shared::{SharedState, VotingStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Starts a listener on an ephemeral port backed by a fresh shared state.
async fn start_peer(node_id: i32) -> (Arc<SharedState>, String) {
    let state = Arc::new(SharedState::new());
    state.set_local_node_id(node_id);
    state.set_daemon_pid(std::process::id());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let ctx = ListenerContext {
        state: state.clone(),
        // Nothing listens here: vote requests will answer None, which the
        // vote tests rely on.
        local_conninfo: "host=127.0.0.1 port=1 connect_timeout=1".to_string(),
        connection_timeout: Duration::from_millis(200),
    };
    tokio::spawn(serve(listener, ctx));
    (state, addr)
}

#[tokio::test]
async fn test_candidature_roundtrip() {
    let (state, addr) = start_peer(2).await;
    let mut client = PeerClient::connect(&addr, CONNECT_TIMEOUT).await.unwrap();

    assert!(client.announce_candidature(3, 1).await.unwrap());
    // First writer won; a different claimant is refused.
    assert!(!client.announce_candidature(4, 1).await.unwrap());
    // The claim is visible in the peer's shared state.
    assert!(!state.announce_candidature(5, 1));
}

#[tokio::test]
async fn test_follow_announcement_roundtrip() {
    let (state, addr) = start_peer(2).await;
    let mut client = PeerClient::connect(&addr, CONNECT_TIMEOUT).await.unwrap();

    assert_eq!(client.get_new_primary().await.unwrap(), None);
    client.notify_follow_primary(7).await.unwrap();
    assert_eq!(client.get_new_primary().await.unwrap(), Some(7));
    assert_eq!(state.get_new_primary(), Some(7));

    client.reset_voting_status().await.unwrap();
    assert_eq!(client.get_new_primary().await.unwrap(), None);
}

#[tokio::test]
async fn test_vote_withheld_when_engine_unreachable() {
    // The listener cannot read a local position, so it must not grant.
    let (state, addr) = start_peer(2).await;
    let mut client = PeerClient::connect(&addr, CONNECT_TIMEOUT).await.unwrap();

    assert_eq!(client.request_vote(3, 1).await.unwrap(), None);
    // The withheld vote did not consume the node's vote for this cycle.
    assert_eq!(state.voting_status(), VotingStatus::NoVote);
}

#[tokio::test]
async fn test_pause_and_running_roundtrip() {
    let (state, addr) = start_peer(2).await;
    let mut client = PeerClient::connect(&addr, CONNECT_TIMEOUT).await.unwrap();

    assert!(!client.is_paused().await.unwrap());
    client.set_paused(true).await.unwrap();
    assert!(client.is_paused().await.unwrap());
    assert!(state.is_paused());

    let (running, pid) = client.is_running().await.unwrap();
    assert!(running);
    assert_eq!(pid, Some(std::process::id()));
}

#[tokio::test]
async fn test_voting_status_roundtrip() {
    let (state, addr) = start_peer(2).await;
    let mut client = PeerClient::connect(&addr, CONNECT_TIMEOUT).await.unwrap();

    assert_eq!(client.get_voting_status().await.unwrap(), VotingStatus::NoVote);
    state.set_voting_status_initiated().unwrap();
    assert_eq!(
        client.get_voting_status().await.unwrap(),
        VotingStatus::VoteInitiated
    );
}

#[tokio::test]
async fn test_multiple_requests_on_one_connection() {
    let (_state, addr) = start_peer(2).await;
    let mut client = PeerClient::connect(&addr, CONNECT_TIMEOUT).await.unwrap();

    for round in 0..10 {
        client.notify_follow_primary(round).await.unwrap();
        assert_eq!(client.get_new_primary().await.unwrap(), Some(round));
    }
}

#[test]
fn test_request_serialization_is_stable() {
    let request = PeerRequest::RequestVote {
        requester: 3,
        term: 9,
    };
    let encoded = serde_json::to_string(&request).unwrap();
    assert_eq!(encoded, r#"{"op":"request_vote","requester":3,"term":9}"#);
    let decoded: PeerRequest = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, request);
}

#[test]
fn test_response_serialization_is_stable() {
    let response = PeerResponse::Granted { granted: true };
    let encoded = serde_json::to_string(&response).unwrap();
    assert_eq!(encoded, r#"{"result":"granted","granted":true}"#);

    let vote: PeerResponse =
        serde_json::from_str(r#"{"result":"vote","lsn":4096}"#).unwrap();
    assert_eq!(
        vote,
        PeerResponse::Vote {
            lsn: Some(repguard::core::lsn::Lsn(4096))
        }
    );
}

use serde_json::json;

use crate::integration::common::{start_server, TestClient};
use parlor::models::TIMEOUT_FORMAT;

async fn signed_in(addr: std::net::SocketAddr, username: &str) -> TestClient {
    let mut client = TestClient::connect(addr).await;
    client
        .send(json!({"type": "signup", "username": username, "password": "pw"}))
        .await;
    client.recv().await;
    client
        .send(json!({"type": "signin", "username": username, "password": "pw"}))
        .await;
    client.recv().await;
    client
}

#[tokio::test]
async fn banned_user_is_pushed_a_ban_frame_and_cannot_sign_back_in() {
    let server = start_server().await;
    let mut alice = signed_in(server.addr, "alice").await;

    server.registry.ban_user("alice", "spamming").expect("ban");

    let pushed = alice.recv().await;
    assert_eq!(pushed["type"], "ban");
    assert_eq!(pushed["reason"], "spamming");

    let mut retry = TestClient::connect(server.addr).await;
    retry
        .send(json!({"type": "signin", "username": "alice", "password": "pw"}))
        .await;
    let resp = retry.recv().await;
    assert_eq!(resp["status"], "ban");
    assert_eq!(resp["reason"], "spamming");
}

#[tokio::test]
async fn kicked_user_cannot_sign_in_until_timeout_expires() {
    let server = start_server().await;
    let mut alice = signed_in(server.addr, "alice").await;

    let future = (chrono::Utc::now() + chrono::Duration::seconds(3600)).format(TIMEOUT_FORMAT).to_string();
    server
        .registry
        .kick_user("alice", "cool off", &future)
        .expect("kick");

    let pushed = alice.recv().await;
    assert_eq!(pushed["type"], "kick");
    assert_eq!(pushed["reason"], "cool off");

    let mut retry = TestClient::connect(server.addr).await;
    retry
        .send(json!({"type": "signin", "username": "alice", "password": "pw"}))
        .await;
    let resp = retry.recv().await;
    assert_eq!(resp["status"], "kick");
}

#[tokio::test]
async fn kick_timeout_in_the_past_lifts_on_next_signin() {
    let server = start_server().await;
    let _alice = signed_in(server.addr, "alice").await;

    let past = (chrono::Utc::now() - chrono::Duration::seconds(10)).format(TIMEOUT_FORMAT).to_string();
    server
        .registry
        .kick_user("alice", "cool off", &past)
        .expect("kick");

    let mut retry = TestClient::connect(server.addr).await;
    retry
        .send(json!({"type": "signin", "username": "alice", "password": "pw"}))
        .await;
    let resp = retry.recv().await;
    assert_eq!(resp["status"], "ok");
}

#[tokio::test]
async fn kill_disconnects_only_the_named_session() {
    let server = start_server().await;
    let mut alice = signed_in(server.addr, "alice").await;
    let mut bob = signed_in(server.addr, "bob").await;

    let found = server.registry.kill("alice", "maintenance");
    assert!(found);

    let pushed = alice.recv().await;
    assert_eq!(pushed["type"], "kill");
    assert_eq!(pushed["reason"], "maintenance");

    // bob is untouched: a subsequent public send from alice's room still
    // reaches bob, proving bob's connection was never closed.
    bob.send(json!({"type": "public", "room": "general", "message": "still here"}))
        .await;
    let reply = bob.recv().await;
    assert_eq!(reply["status"], "ok");
}

#[tokio::test]
async fn kill_against_an_offline_user_reports_not_found() {
    let server = start_server().await;
    assert!(!server.registry.kill("nobody", "maintenance"));
}

#[tokio::test]
async fn kick_does_not_force_close_the_socket_but_blocks_further_sends() {
    let server = start_server().await;
    let mut alice = signed_in(server.addr, "alice").await;

    let future = (chrono::Utc::now() + chrono::Duration::seconds(3600)).format(TIMEOUT_FORMAT).to_string();
    server
        .registry
        .kick_user("alice", "cool off", &future)
        .expect("kick");

    let pushed = alice.recv().await;
    assert_eq!(pushed["type"], "kick");

    // The connection itself is still open: a further request on it gets a
    // normal protocol reply (rejected on moderation grounds), not a closed
    // socket.
    alice
        .send(json!({"type": "public", "room": "general", "message": "let me back in"}))
        .await;
    let resp = alice.recv().await;
    assert_eq!(resp["status"], "error");
    assert_eq!(resp["reason"], "not_valid_sender");
}

#[tokio::test]
async fn unban_reverts_state_and_notifies_the_live_session() {
    let server = start_server().await;
    let mut alice = signed_in(server.addr, "alice").await;

    server.registry.ban_user("alice", "spamming").expect("ban");
    alice.recv().await; // the ban frame; the ban also closes the socket

    server.registry.unban_user("alice").expect("unban");

    let mut retry = TestClient::connect(server.addr).await;
    retry
        .send(json!({"type": "signin", "username": "alice", "password": "pw"}))
        .await;
    let resp = retry.recv().await;
    assert_eq!(resp["status"], "ok");
}

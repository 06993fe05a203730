use serde_json::json;

use crate::integration::common::{start_server, TestClient};

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
async fn private_initiation_only_stands_up_the_room_and_does_not_relay() {
    let server = start_server().await;
    let mut alice = signed_in(server.addr, "alice").await;
    let mut bob = signed_in(server.addr, "bob").await;

    alice
        .send(json!({"type": "private", "to": "bob", "user": "alice", "message": "hey bob"}))
        .await;
    let reply = alice.recv().await;
    assert_eq!(reply["type"], "private");
    assert_eq!(reply["status"], "ok");

    // The initiating `private` call never relays the body; both sides are
    // now members of the lexicographically-named room, so the actual chat
    // traffic flows as ordinary `public` sends targeting it.
    let room = {
        let mut names = ["alice", "bob"];
        names.sort();
        names.concat()
    };
    alice
        .send(json!({"type": "public", "room": room, "message": "hey bob, for real this time"}))
        .await;
    let ack = alice.recv().await;
    assert_eq!(ack["status"], "ok");

    let pushed = bob.recv().await;
    assert_eq!(pushed["type"], "public");
    assert_eq!(pushed["room"], room);
    assert_eq!(pushed["user"], "alice");
    assert_eq!(pushed["message"], "hey bob, for real this time");
}

#[tokio::test]
async fn a_second_private_initiation_from_either_side_reuses_the_same_room() {
    let server = start_server().await;
    let mut alice = signed_in(server.addr, "alice").await;
    let mut bob = signed_in(server.addr, "bob").await;

    alice
        .send(json!({"type": "private", "to": "bob", "user": "alice", "message": "hi"}))
        .await;
    assert_eq!(alice.recv().await["status"], "ok");

    bob.send(json!({"type": "private", "to": "alice", "user": "bob", "message": "hi back"}))
        .await;
    assert_eq!(bob.recv().await["status"], "ok");

    let room = {
        let mut names = ["alice", "bob"];
        names.sort();
        names.concat()
    };
    bob.send(json!({"type": "public", "room": room.clone(), "message": "still one room"}))
        .await;
    assert_eq!(bob.recv().await["status"], "ok");
    let pushed = alice.recv().await;
    assert_eq!(pushed["room"], room);
}

#[tokio::test]
async fn private_message_to_unknown_user_fails() {
    let server = start_server().await;
    let mut alice = signed_in(server.addr, "alice").await;

    alice
        .send(json!({"type": "private", "to": "ghost", "user": "alice", "message": "hi"}))
        .await;
    let resp = alice.recv().await;
    assert_eq!(resp["status"], "error");
    assert_eq!(resp["reason"], "recipient_not_found");
}

use serde_json::json;

use crate::integration::common::{start_server, TestClient};

#[tokio::test]
async fn signup_then_signin_succeeds() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client
        .send(json!({"type": "signup", "username": "alice", "password": "hunter2"}))
        .await;
    let resp = client.recv().await;
    assert_eq!(resp["type"], "signup");
    assert_eq!(resp["status"], "ok");

    let mut signin = TestClient::connect(server.addr).await;
    signin
        .send(json!({"type": "signin", "username": "alice", "password": "hunter2"}))
        .await;
    let resp = signin.recv().await;
    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["all_rooms"], json!(["general"]));
    assert_eq!(resp["rooms"], json!(["general"]));
}

#[tokio::test]
async fn signup_rejects_duplicate_username() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client
        .send(json!({"type": "signup", "username": "bob", "password": "pw"}))
        .await;
    client.recv().await;

    let mut second = TestClient::connect(server.addr).await;
    second
        .send(json!({"type": "signup", "username": "bob", "password": "other"}))
        .await;
    let resp = second.recv().await;
    assert_eq!(resp["status"], "error");
    assert_eq!(resp["reason"], "username_already_used");
}

#[tokio::test]
async fn signin_rejects_wrong_password() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;
    client
        .send(json!({"type": "signup", "username": "carol", "password": "correct"}))
        .await;
    client.recv().await;

    client
        .send(json!({"type": "signin", "username": "carol", "password": "wrong"}))
        .await;
    let resp = client.recv().await;
    assert_eq!(resp["status"], "error");
    assert_eq!(resp["reason"], "incorrect_password");
}

#[tokio::test]
async fn signin_rejects_unknown_user() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;
    client
        .send(json!({"type": "signin", "username": "nobody", "password": "pw"}))
        .await;
    let resp = client.recv().await;
    assert_eq!(resp["status"], "error");
    assert_eq!(resp["reason"], "incorrect_username");
}

#[tokio::test]
async fn requests_before_signin_are_rejected() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;
    client
        .send(json!({"type": "public", "room": "general", "message": "hi"}))
        .await;
    let resp = client.recv().await;
    assert_eq!(resp["status"], "error");
    assert_eq!(resp["reason"], "not_logged_in");
}

#[tokio::test]
async fn signup_authenticates_the_connection_immediately() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;

    client
        .send(json!({"type": "signup", "username": "erin", "password": "pw"}))
        .await;
    let resp = client.recv().await;
    assert_eq!(resp["status"], "ok");

    // No separate `signin` round trip: the same connection can send right
    // away, since signup transitions straight to AUTHENTICATED.
    client
        .send(json!({"type": "public", "room": "general", "message": "first post"}))
        .await;
    let resp = client.recv().await;
    assert_eq!(resp["status"], "ok");
}

#[tokio::test]
async fn disconnect_acknowledges_and_closes() {
    let server = start_server().await;
    let mut client = TestClient::connect(server.addr).await;
    client
        .send(json!({"type": "signup", "username": "dana", "password": "pw"}))
        .await;
    client.recv().await;
    client
        .send(json!({"type": "signin", "username": "dana", "password": "pw"}))
        .await;
    client.recv().await;

    client.send(json!({"type": "disconnect"})).await;
    let resp = client.recv().await;
    assert_eq!(resp["status"], "ok");
}

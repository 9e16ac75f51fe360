//! Chat socket tests against a served router

use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Error as WsError},
};

use pawchat::config::RateLimitSettings;
use pawchat::domain::{ChatRepository, RoomType};
use pawchat::presentation::websocket::Action;

use crate::common::{
    connect_chat, next_envelope, send_json, test_settings, test_user, TestApp,
};

/// Seeding runs after the handshake completes, so poll for it.
async fn wait_for_members(app: &TestApp, room_id: i64, expected: usize) {
    for _ in 0..50 {
        let members = app.state.chat.get_room_members(room_id).await.unwrap();
        if members.len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("room {room_id} never reached {expected} members");
}

#[tokio::test]
async fn test_upgrade_without_credential_is_unauthorized() {
    let app = TestApp::new();
    let addr = app.spawn().await;

    let err = connect_async(format!("ws://{}/ws", addr)).await.unwrap_err();

    match err {
        WsError::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_upgrade_accepts_bearer_header() {
    let app = TestApp::new();
    let token = app.seed_user(test_user(1, "Biscuit"));
    let addr = app.spawn().await;

    let mut request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {}", token).parse().unwrap());

    let (_socket, response) = connect_async(request).await.unwrap();

    assert_eq!(response.status(), 101);
    assert!(response.headers().contains_key("x-ratelimit-limit"));
}

#[tokio::test]
async fn test_two_clients_join_and_chat() {
    let app = TestApp::new();
    let alice_token = app.seed_user(test_user(1, "Alice"));
    let bob_token = app.seed_user(test_user(2, "Bob"));
    let addr = app.spawn().await;

    let mut alice = connect_chat(addr, &alice_token).await;
    send_json(
        &mut alice,
        json!({"action": "JOIN_ROOM", "target": {"name": "walkies", "roomType": "event"}}),
    )
    .await;

    let joined = next_envelope(&mut alice).await;
    assert_eq!(joined.action, Action::UserJoin);
    let confirmed = next_envelope(&mut alice).await;
    assert_eq!(confirmed.action, Action::RoomJoined);
    let room = confirmed.target.expect("room joined carries the room");
    assert_eq!(room.name, "walkies");
    assert!(room.id > 0);

    let mut bob = connect_chat(addr, &bob_token).await;
    send_json(
        &mut bob,
        json!({"action": "JOIN_ROOM", "target": {"id": room.id}}),
    )
    .await;

    let bob_seen_by_alice = next_envelope(&mut alice).await;
    assert_eq!(bob_seen_by_alice.action, Action::UserJoin);
    assert_eq!(bob_seen_by_alice.sender.unwrap().name, "Bob");
    assert_eq!(next_envelope(&mut bob).await.action, Action::UserJoin);
    assert_eq!(next_envelope(&mut bob).await.action, Action::RoomJoined);

    send_json(
        &mut alice,
        json!({"action": "SEND_MESSAGE", "message": "who wants a walk?", "target": {"id": room.id}}),
    )
    .await;

    for socket in [&mut alice, &mut bob] {
        let message = next_envelope(socket).await;
        assert_eq!(message.action, Action::SendMessage);
        assert_eq!(message.message, "who wants a walk?");
        assert_eq!(message.sender.unwrap().id, "uid-alice");
        assert!(message.id.is_some());
        assert!(message.created_at.is_some());
    }

    let history = app
        .repo
        .find_messages_by_room(room.id, None, 10)
        .await
        .unwrap();
    assert_eq!(history.messages[0].content, "who wants a walk?");
}

#[tokio::test]
async fn test_leave_notifies_remaining_members() {
    let app = TestApp::new();
    let alice_token = app.seed_user(test_user(1, "Alice"));
    let bob_token = app.seed_user(test_user(2, "Bob"));
    let room = app.repo.create_room("park", RoomType::Group).await.unwrap();
    app.repo.join_room(room.id, 1).await.unwrap();
    app.repo.join_room(room.id, 2).await.unwrap();
    let addr = app.spawn().await;

    // Persisted memberships are attached on connect
    let mut alice = connect_chat(addr, &alice_token).await;
    let mut bob = connect_chat(addr, &bob_token).await;
    wait_for_members(&app, room.id, 2).await;

    send_json(
        &mut bob,
        json!({"action": "LEAVE_ROOM", "target": {"id": room.id}}),
    )
    .await;

    let left = next_envelope(&mut alice).await;
    assert_eq!(left.action, Action::UserLeft);
    assert_eq!(left.sender.unwrap().name, "Bob");
    assert!(app
        .repo
        .find_active_membership(room.id, 2)
        .await
        .unwrap()
        .is_none());

    // Leaving again is reported to the sender only
    send_json(
        &mut bob,
        json!({"action": "LEAVE_ROOM", "target": {"id": room.id}}),
    )
    .await;
    assert_eq!(next_envelope(&mut bob).await.action, Action::Error);
}

#[tokio::test]
async fn test_send_to_unknown_room_returns_error_frame() {
    let app = TestApp::new();
    let token = app.seed_user(test_user(1, "Alice"));
    let addr = app.spawn().await;
    let mut alice = connect_chat(addr, &token).await;

    send_json(
        &mut alice,
        json!({"action": "SEND_MESSAGE", "message": "hello?", "target": {"id": 404}}),
    )
    .await;

    let error = next_envelope(&mut alice).await;
    assert_eq!(error.action, Action::Error);
    assert_eq!(error.target.unwrap().id, 404);
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let app = TestApp::new();
    let token = app.seed_user(test_user(1, "Alice"));
    let addr = app.spawn().await;
    let mut alice = connect_chat(addr, &token).await;

    futures::SinkExt::send(
        &mut alice,
        tokio_tungstenite::tungstenite::Message::text("{not json"),
    )
    .await
    .unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = alice.next().await {
            match frame {
                Ok(frame) if frame.is_close() => return true,
                Ok(_) => continue,
                Err(_) => return true,
            }
        }
        true
    })
    .await
    .unwrap();

    assert!(closed);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(app.state.gateway.stats().connections, 0);
}

#[tokio::test]
async fn test_upgrade_is_rate_limited() {
    let mut settings = test_settings();
    settings.rate_limit = RateLimitSettings {
        websocket_per_minute: 1,
        burst: 0,
    };
    let app = TestApp::with_settings(settings);
    let token = app.seed_user(test_user(1, "Alice"));
    let addr = app.spawn().await;

    let _first = connect_chat(addr, &token).await;
    let err = connect_async(format!("ws://{}/ws?token={}", addr, token))
        .await
        .unwrap_err();

    match err {
        WsError::Http(response) => assert_eq!(response.status(), 429),
        other => panic!("unexpected error: {other}"),
    }
}

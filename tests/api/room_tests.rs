//! REST room endpoint tests

use axum::http::StatusCode;
use pawchat::domain::{ChatRepository, MessageType, RoomType};

use crate::common::{json_body, test_user, TestApp};

#[tokio::test]
async fn test_api_requires_credential() {
    let app = TestApp::new();

    let response = app.get("/api/v1/users/@me/rooms").await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["code"], 10003);
}

#[tokio::test]
async fn test_api_rejects_unknown_user() {
    let app = TestApp::new();
    // Signed correctly but never inserted
    let token = crate::common::token_for(&test_user(9, "Ghost"));

    let response = app.get_auth("/api/v1/users/@me/rooms", &token).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_room_starts_live_room() {
    let app = TestApp::new();
    let token = app.seed_user(test_user(1, "Biscuit"));

    let response = app
        .post_json_auth(
            "/api/v1/rooms",
            r#"{"name":"park meetup","roomType":"group"}"#,
            &token,
        )
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    assert_eq!(json["name"], "park meetup");
    assert_eq!(json["roomType"], "group");

    let room_id = json["id"].as_i64().unwrap();
    assert!(app.state.chat.find_room_by_id(room_id).is_some());
}

#[tokio::test]
async fn test_create_room_validates_name() {
    let app = TestApp::new();
    let token = app.seed_user(test_user(1, "Biscuit"));

    let empty = app
        .post_json_auth("/api/v1/rooms", r#"{"name":""}"#, &token)
        .await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let blank = app
        .post_json_auth("/api/v1/rooms", r#"{"name":"   "}"#, &token)
        .await;
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_room_history_for_members_only() {
    let app = TestApp::new();
    let member = app.seed_user(test_user(1, "Biscuit"));
    let outsider = app.seed_user(test_user(2, "Mochi"));

    let room = app.repo.create_room("walkies", RoomType::Event).await.unwrap();
    app.repo.join_room(room.id, 1).await.unwrap();
    for n in 0..3 {
        app.repo
            .write_message(room.id, 1, MessageType::Normal, &format!("woof {n}"))
            .await
            .unwrap();
    }

    let uri = format!("/api/v1/rooms/{}/messages?limit=2", room.id);

    let response = app.get_auth(&uri, &member).await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = json_body(response).await;
    let messages = page["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "woof 2");
    assert_eq!(page["nextCursor"], messages[1]["id"]);

    let response = app.get_auth(&uri, &outsider).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.get_auth("/api/v1/rooms/9999/messages", &member).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_my_rooms_lists_active_memberships() {
    let app = TestApp::new();
    let token = app.seed_user(test_user(1, "Biscuit"));
    let walkies = app.repo.create_room("walkies", RoomType::Event).await.unwrap();
    let park = app.repo.create_room("park", RoomType::Group).await.unwrap();
    app.repo.join_room(walkies.id, 1).await.unwrap();
    app.repo.join_room(park.id, 1).await.unwrap();
    app.repo.leave_room(park.id, 1).await.unwrap();

    let response = app.get_auth("/api/v1/users/@me/rooms", &token).await;

    assert_eq!(response.status(), StatusCode::OK);
    let rooms = json_body(response).await;
    let names: Vec<_> = rooms
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(names, vec!["walkies".to_string()]);
}
